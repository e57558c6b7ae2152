use serialmon::{SerialMonError, SerialMonResult};
use std::error::Error;

/// Error handling tests
#[cfg(test)]
mod error_handling_tests {
    use super::*;

    fn all_variants() -> Vec<SerialMonError> {
        vec![
            SerialMonError::Open { path: "/dev/ttyUSB0".to_string(), message: "busy".to_string() },
            SerialMonError::NotFound { key: "COM3".to_string() },
            SerialMonError::Write { key: "COM3".to_string(), message: "broken pipe".to_string() },
            SerialMonError::Stream { key: "COM3".to_string(), message: "framing".to_string() },
            SerialMonError::ReconnectInProgress { key: "COM3".to_string() },
            SerialMonError::Enumerate("udev unavailable".to_string()),
            SerialMonError::Config { message: "bad toml".to_string() },
            SerialMonError::InvalidInput("data bits".to_string()),
            SerialMonError::Output("stdout closed".to_string()),
            SerialMonError::Io(std::io::Error::new(std::io::ErrorKind::Other, "io")),
        ]
    }

    #[test]
    fn test_every_variant_has_a_distinct_kind() {
        let mut kinds: Vec<&str> = all_variants().iter().map(SerialMonError::kind).collect();
        let total = kinds.len();
        kinds.sort();
        kinds.dedup();
        assert_eq!(kinds.len(), total);

        for error in all_variants() {
            assert!(!error.to_string().is_empty());
            assert!(error.kind().chars().all(|c| c.is_ascii_lowercase() || c == '_'));
        }
    }

    #[test]
    fn test_io_error_conversion_keeps_source() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "Access denied");
        let error: SerialMonError = io_error.into();

        assert!(matches!(error, SerialMonError::Io(_)));
        assert_eq!(error.kind(), "io");
        assert!(error.source().is_some());
    }

    #[test]
    fn test_error_formatting() {
        let error = SerialMonError::Open {
            path: "/dev/ttyUSB0".to_string(),
            message: "Permission denied".to_string(),
        };

        let display = format!("{}", error);
        assert!(display.contains("/dev/ttyUSB0"));
        assert!(display.contains("Permission denied"));
        assert_ne!(display, format!("{:?}", error));
    }

    #[tokio::test]
    async fn test_async_error_propagation() {
        async fn failing() -> SerialMonResult<()> {
            Err(SerialMonError::NotFound { key: "COM7".to_string() })
        }

        async fn calling() -> SerialMonResult<()> {
            failing().await?;
            Ok(())
        }

        let error = calling().await.unwrap_err();
        assert_eq!(error.kind(), "not_found");
        assert!(error.to_string().contains("COM7"));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync + 'static>() {}
        assert_send_sync::<SerialMonError>();
    }

    #[test]
    fn test_error_size() {
        let error_size = std::mem::size_of::<SerialMonError>();
        assert!(error_size <= 128, "SerialMonError too large: {} bytes", error_size);
    }
}
