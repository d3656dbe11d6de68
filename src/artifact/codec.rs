//! External image codec capability.
//!
//! Encoding and overlay compositing are not implemented here — they are
//! requested from external tools under `<root>/bin/`. The trait is the seam:
//! the runner only needs "raw capture in, distribution bytes out", and tests
//! substitute their own implementation.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("No image data.")]
    NoData,

    #[error("{0}")]
    Tool(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Image encode/overlay capability.
#[async_trait]
pub trait ImageCodec: Send + Sync {
    /// Encode a raw capture file into the distribution format (WebP).
    async fn encode(&self, image: &Path) -> Result<Vec<u8>, CodecError>;

    /// Composite an overlay graphic onto already-encoded image bytes and
    /// re-encode.
    async fn composite(&self, image: &[u8], overlay: &Path) -> Result<Vec<u8>, CodecError>;
}

/// Default codec: shells out to the bundled tools.
///
/// `cwebp -quiet <file> -o -` encodes to stdout; `webp-overlay <overlay>`
/// reads the encoded image on stdin and writes the composited re-encode to
/// stdout.
pub struct ProcessCodec {
    bin: PathBuf,
}

impl ProcessCodec {
    pub fn new(root: &Path) -> Self {
        Self {
            bin: root.join("bin"),
        }
    }
}

#[async_trait]
impl ImageCodec for ProcessCodec {
    async fn encode(&self, image: &Path) -> Result<Vec<u8>, CodecError> {
        let output = Command::new(self.bin.join("cwebp"))
            .arg("-quiet")
            .arg(image)
            .args(["-o", "-"])
            .stdin(Stdio::null())
            .output()
            .await?;

        if output.stdout.is_empty() {
            return Err(CodecError::NoData);
        }
        Ok(output.stdout)
    }

    async fn composite(&self, image: &[u8], overlay: &Path) -> Result<Vec<u8>, CodecError> {
        let mut child = Command::new(self.bin.join("webp-overlay"))
            .arg(overlay)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(image).await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(CodecError::Tool(format!(
                "Overlay tool failed: {}",
                output.status
            )));
        }
        if output.stdout.is_empty() {
            return Err(CodecError::NoData);
        }
        Ok(output.stdout)
    }
}
