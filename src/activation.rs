//! Microphone permission probe.
//!
//! Activation opens (and immediately releases) a capture stream purely to
//! surface the platform permission prompt before the first recognition
//! session starts. Behind a trait so tests can script a denial.

use async_trait::async_trait;

use crate::error::{Result, VoxloopError};

/// Platform microphone-permission probe.
#[async_trait]
pub trait MicrophoneProbe: Send + Sync {
    /// Request microphone access, releasing the stream immediately on grant.
    async fn request(&self) -> Result<()>;
}

/// Probe for platforms where capture access needs no prompt.
#[derive(Debug, Default)]
pub struct GrantedProbe;

#[async_trait]
impl MicrophoneProbe for GrantedProbe {
    async fn request(&self) -> Result<()> {
        Ok(())
    }
}

/// Mock probe for testing.
#[derive(Debug)]
pub struct MockProbe {
    granted: bool,
    requests: std::sync::atomic::AtomicUsize,
}

impl MockProbe {
    pub fn granted() -> Self {
        Self {
            granted: true,
            requests: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn denied() -> Self {
        Self {
            granted: false,
            requests: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl MicrophoneProbe for MockProbe {
    async fn request(&self) -> Result<()> {
        self.requests
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if self.granted {
            Ok(())
        } else {
            Err(VoxloopError::PermissionDenied {
                message: "microphone access denied".to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn granted_probe_always_succeeds() {
        assert!(GrantedProbe.request().await.is_ok());
    }

    #[tokio::test]
    async fn mock_probe_grant_and_denial() {
        let probe = MockProbe::granted();
        assert!(probe.request().await.is_ok());
        assert_eq!(probe.request_count(), 1);

        let probe = MockProbe::denied();
        let err = probe.request().await.unwrap_err();
        assert!(matches!(err, VoxloopError::PermissionDenied { .. }));
        assert_eq!(probe.request_count(), 1);
    }
}
