pub const STATUS_MESSAGE: &str = "Image recognition worker is running.";

/// Path prefix that existing fleet health checks still request.
pub const LEGACY_PREFIX: &str = "/image-service-slave";

/// GET / (also under [`LEGACY_PREFIX`]): static availability string for fleet health checks.
pub async fn status() -> &'static str {
    STATUS_MESSAGE
}
