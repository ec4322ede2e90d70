use std::io;
use std::path::Path;

use log::{debug, error};
use tokio::fs;

/// Ensures that a directory exists, creating it and its parents if needed.
/// Idempotent.
pub async fn ensure_directory_exists<P: AsRef<Path>>(path: P) -> io::Result<()> {
    let path = path.as_ref();
    if fs::try_exists(path).await? {
        return Ok(());
    }
    if let Err(e) = fs::create_dir_all(path).await {
        error!("Failed to create directory at {:?}: {}", path, e);
        return Err(e);
    }
    debug!("Created directory at: {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn creates_nested_directories_once() {
        let root = std::env::temp_dir().join(format!("ble-playground-{}", Uuid::new_v4()));
        let nested = root.join("a").join("b");

        ensure_directory_exists(&nested).await.unwrap();
        ensure_directory_exists(&nested).await.unwrap();
        assert!(nested.is_dir());

        fs::remove_dir_all(&root).await.unwrap();
    }
}
