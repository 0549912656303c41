//! Maps transport-level failures to the engine's [`ErrorClass`] taxonomy
//! (spec.md §4.4).

use promptchain_error::ErrorClass;

#[must_use]
pub fn classify_reqwest_error(err: &reqwest::Error) -> ErrorClass {
    if let Some(status) = err.status() {
        return classify_status(status.as_u16());
    }
    if err.is_timeout() || err.is_connect() {
        return ErrorClass::Network;
    }
    ErrorClass::ProviderInternal
}

#[must_use]
pub fn classify_status(status: u16) -> ErrorClass {
    match status {
        401 | 403 => ErrorClass::Auth,
        404 => ErrorClass::ModelUnavailable,
        408 | 429 => ErrorClass::RateLimit,
        400..=499 => ErrorClass::InvalidRequest,
        500..=599 => ErrorClass::ProviderInternal,
        _ => ErrorClass::ProviderInternal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_auth_and_rate_limit_status_codes() {
        assert_eq!(classify_status(401), ErrorClass::Auth);
        assert_eq!(classify_status(429), ErrorClass::RateLimit);
        assert_eq!(classify_status(404), ErrorClass::ModelUnavailable);
        assert_eq!(classify_status(500), ErrorClass::ProviderInternal);
        assert_eq!(classify_status(400), ErrorClass::InvalidRequest);
    }
}
