use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use ortho_proto::StoredImage;
use tokio::fs;
use tracing::info;

/// Extensions accepted when packaging annotated files into an export archive.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "tif", "tiff", "webp"];

static SEQ: AtomicU64 = AtomicU64::new(0);

pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Two flat directories under the data dir: uploaded originals and annotated
/// outputs. Files are process-owned; cleanup is out of scope.
#[derive(Debug, Clone)]
pub struct FileStore {
    upload_dir: PathBuf,
    annotated_dir: PathBuf,
}

impl FileStore {
    pub fn open(data_dir: &Path) -> Result<Self> {
        let upload_dir = data_dir.join("uploaded_images");
        let annotated_dir = data_dir.join("annotated_images");
        std::fs::create_dir_all(&upload_dir).context("create upload dir")?;
        std::fs::create_dir_all(&annotated_dir).context("create annotated dir")?;
        info!("store: data dir {}", data_dir.display());
        Ok(Self { upload_dir, annotated_dir })
    }

    /// Collision-free name preserving the original extension.
    pub fn unique_name(original: &str) -> String {
        let ts = time::OffsetDateTime::now_utc().unix_timestamp_nanos();
        let seq = SEQ.fetch_add(1, Ordering::Relaxed);
        match Path::new(original).extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("{}-{}.{}", ts, seq, ext),
            None => format!("{}-{}", ts, seq),
        }
    }

    pub async fn save_upload(&self, original: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.upload_dir.join(Self::unique_name(original));
        fs::write(&path, bytes).await.with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }

    /// Where the annotated copy of `image_path` lives: same basename, our dir.
    pub fn annotated_target(&self, image_path: &str) -> PathBuf {
        let name = Path::new(image_path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| Self::unique_name("annotated.png"));
        self.annotated_dir.join(name)
    }

    /// Lookup by bare name only; anything resembling a path is rejected.
    pub fn annotated_lookup(&self, name: &str) -> Option<PathBuf> {
        if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
            return None;
        }
        let path = self.annotated_dir.join(name);
        path.is_file().then_some(path)
    }

    pub async fn list_annotated(&self) -> Result<Vec<StoredImage>> {
        let mut images = Vec::new();
        let mut entries = fs::read_dir(&self.annotated_dir).await.context("read annotated dir")?;
        while let Some(ent) = entries.next_entry().await? {
            let path = ent.path();
            let ext_ok = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| matches!(e.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg"))
                .unwrap_or(false);
            if !path.is_file() || !ext_ok {
                continue;
            }
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(n) => n.to_string(),
                None => continue,
            };
            let size = ent.metadata().await?.len();
            images.push(StoredImage { path: format!("/annotated-images/{}", name), name, size });
        }
        images.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(images)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_names_do_not_collide_and_keep_extension() {
        let a = FileStore::unique_name("scene.TIF");
        let b = FileStore::unique_name("scene.TIF");
        assert_ne!(a, b);
        assert!(a.ends_with(".TIF"));
        assert!(FileStore::unique_name("noext").rfind('.').is_none());
    }

    #[tokio::test]
    async fn save_upload_writes_into_upload_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let path = store.save_upload("photo.jpg", b"abc").await.unwrap();
        assert!(path.starts_with(dir.path().join("uploaded_images")));
        assert_eq!(std::fs::read(&path).unwrap(), b"abc");
    }

    #[test]
    fn annotated_lookup_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        std::fs::write(store.annotated_target("ok.png"), b"x").unwrap();

        assert!(store.annotated_lookup("ok.png").is_some());
        assert!(store.annotated_lookup("../secret.png").is_none());
        assert!(store.annotated_lookup("a/b.png").is_none());
        assert!(store.annotated_lookup("gone.png").is_none());
    }

    #[tokio::test]
    async fn list_annotated_filters_non_images() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        std::fs::write(store.annotated_target("a.png"), b"123").unwrap();
        std::fs::write(store.annotated_target("b.txt"), b"456").unwrap();

        let images = store.list_annotated().await.unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].name, "a.png");
        assert_eq!(images[0].size, 3);
        assert_eq!(images[0].path, "/annotated-images/a.png");
    }

    #[test]
    fn image_file_filter_is_case_insensitive() {
        assert!(is_image_file(Path::new("x.PNG")));
        assert!(is_image_file(Path::new("x.webp")));
        assert!(!is_image_file(Path::new("x.txt")));
        assert!(!is_image_file(Path::new("x")));
    }
}
