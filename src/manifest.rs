//! Workload descriptor rendering.
//!
//! Descriptors are an opaque lookup keyed by product: one embedded SDL
//! template each, with the target provider substituted into a placeholder
//! token. The rendered result is written to a per-session temporary path
//! that lives as long as the session holds it.

use std::io::Write;

use tempfile::NamedTempFile;

use crate::error::BrokerError;
use crate::job::Product;

const PROVIDER_TOKEN: &str = "{{PROVIDER}}";

fn template(product: Product) -> &'static str {
    match product {
        Product::Whisper => include_str!("../templates/whisper.yaml"),
        Product::Sd => include_str!("../templates/sd.yaml"),
        Product::Llama => include_str!("../templates/llama.yaml"),
    }
}

/// Render the product's descriptor with the provider address substituted and
/// write it to a temporary file. The returned path deletes itself on drop.
pub fn render(product: Product, provider: &str) -> Result<tempfile::TempPath, BrokerError> {
    let rendered = template(product).replace(PROVIDER_TOKEN, provider);

    let mut file = NamedTempFile::with_prefix(format!("{product}-sdl-"))
        .map_err(|e| BrokerError::ManifestRenderFailed(e.to_string()))?;
    file.write_all(rendered.as_bytes())
        .map_err(|e| BrokerError::ManifestRenderFailed(e.to_string()))?;
    file.flush()
        .map_err(|e| BrokerError::ManifestRenderFailed(e.to_string()))?;

    Ok(file.into_temp_path())
}
