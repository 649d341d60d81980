//! Template and reference-image persistence.
//!
//! Templates are one record per user. Writers for the same user are
//! serialised: `upsert` runs its closure while holding that user's lock, so a
//! concurrent enroll and verify never observe a half-written record.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use tempfile::NamedTempFile;

use crate::capture::extension_for;
use crate::types::{AuthError, AuthResult, EnrollmentRecord};

/// Subdirectory holding reference and probe images.
pub const IMAGE_DIR: &str = "facial_images";
/// Subdirectory holding one JSON template per user.
pub const TEMPLATE_DIR: &str = "templates";

const MAX_USER_ID_LEN: usize = 128;

/// User ids become file names: non-empty ASCII alphanumerics, `-` and `_`.
pub fn validate_user_id(user_id: &str) -> AuthResult<()> {
    let invalid = |message: &str| AuthError::InvalidUser {
        user: user_id.to_string(),
        message: message.to_string(),
    };
    if user_id.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if user_id.len() > MAX_USER_ID_LEN {
        return Err(invalid("too long"));
    }
    if !user_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(invalid(
            "only ASCII letters, digits, '-' and '_' are allowed",
        ));
    }
    Ok(())
}

fn lock_poisoned<T>(_: T) -> AuthError {
    AuthError::Storage("store lock poisoned".to_string())
}

/// Persistence for enrollment templates.
pub trait TemplateStore: Send + Sync {
    fn load(&self, user_id: &str) -> AuthResult<Option<EnrollmentRecord>>;

    /// Replace the user's record with the closure's result, under the user's writer lock.
    fn upsert(
        &self,
        user_id: &str,
        update: &mut dyn FnMut(Option<&EnrollmentRecord>) -> AuthResult<EnrollmentRecord>,
    ) -> AuthResult<EnrollmentRecord>;

    /// Remove and return the user's record, if any.
    fn delete(&self, user_id: &str) -> AuthResult<Option<EnrollmentRecord>>;

    fn list(&self) -> AuthResult<Vec<EnrollmentRecord>>;
}

#[derive(Debug, Default)]
pub struct InMemoryTemplateStore {
    records: RwLock<HashMap<String, EnrollmentRecord>>,
}

impl InMemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TemplateStore for InMemoryTemplateStore {
    fn load(&self, user_id: &str) -> AuthResult<Option<EnrollmentRecord>> {
        let records = self.records.read().map_err(lock_poisoned)?;
        Ok(records.get(user_id).cloned())
    }

    fn upsert(
        &self,
        user_id: &str,
        update: &mut dyn FnMut(Option<&EnrollmentRecord>) -> AuthResult<EnrollmentRecord>,
    ) -> AuthResult<EnrollmentRecord> {
        let mut records = self.records.write().map_err(lock_poisoned)?;
        let record = update(records.get(user_id))?;
        records.insert(user_id.to_string(), record.clone());
        Ok(record)
    }

    fn delete(&self, user_id: &str) -> AuthResult<Option<EnrollmentRecord>> {
        let mut records = self.records.write().map_err(lock_poisoned)?;
        Ok(records.remove(user_id))
    }

    fn list(&self) -> AuthResult<Vec<EnrollmentRecord>> {
        let records = self.records.read().map_err(lock_poisoned)?;
        let mut all: Vec<EnrollmentRecord> = records.values().cloned().collect();
        all.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(all)
    }
}

/// One pretty-printed JSON file per user, written atomically with mode 0600.
#[derive(Debug)]
pub struct FileTemplateStore {
    dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl FileTemplateStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            dir: data_dir.join(TEMPLATE_DIR),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, user_id: &str) -> AuthResult<PathBuf> {
        validate_user_id(user_id)?;
        Ok(self.dir.join(format!("{user_id}.json")))
    }

    fn user_lock(&self, user_id: &str) -> AuthResult<Arc<Mutex<()>>> {
        let mut locks = self.locks.lock().map_err(lock_poisoned)?;
        Ok(locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone())
    }

    fn read(path: &Path) -> AuthResult<Option<EnrollmentRecord>> {
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read(path)?;
        let record = serde_json::from_slice(&data).map_err(|e| {
            AuthError::Storage(format!("invalid template file {}: {e}", path.display()))
        })?;
        Ok(Some(record))
    }

    fn write(&self, path: &Path, record: &EnrollmentRecord) -> AuthResult<()> {
        fs::create_dir_all(&self.dir)?;
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        serde_json::to_writer_pretty(tmp.as_file_mut(), record)?;
        tmp.as_file_mut().write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        let file = tmp.persist(path).map_err(|e| AuthError::Io(e.error))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = file.metadata()?.permissions();
            perms.set_mode(0o600);
            file.set_permissions(perms)?;
        }
        #[cfg(not(unix))]
        drop(file);

        Ok(())
    }
}

impl TemplateStore for FileTemplateStore {
    fn load(&self, user_id: &str) -> AuthResult<Option<EnrollmentRecord>> {
        let path = self.path_for(user_id)?;
        let lock = self.user_lock(user_id)?;
        let _guard = lock.lock().map_err(lock_poisoned)?;
        Self::read(&path)
    }

    fn upsert(
        &self,
        user_id: &str,
        update: &mut dyn FnMut(Option<&EnrollmentRecord>) -> AuthResult<EnrollmentRecord>,
    ) -> AuthResult<EnrollmentRecord> {
        let path = self.path_for(user_id)?;
        let lock = self.user_lock(user_id)?;
        let _guard = lock.lock().map_err(lock_poisoned)?;
        let existing = Self::read(&path)?;
        let record = update(existing.as_ref())?;
        self.write(&path, &record)?;
        tracing::debug!("Template for {user_id} written to {}", path.display());
        Ok(record)
    }

    fn delete(&self, user_id: &str) -> AuthResult<Option<EnrollmentRecord>> {
        let path = self.path_for(user_id)?;
        let lock = self.user_lock(user_id)?;
        let _guard = lock.lock().map_err(lock_poisoned)?;
        let existing = Self::read(&path)?;
        if existing.is_some() {
            fs::remove_file(&path)?;
        }
        Ok(existing)
    }

    fn list(&self) -> AuthResult<Vec<EnrollmentRecord>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut all = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read(&path) {
                Ok(Some(record)) => all.push(record),
                Ok(None) => {}
                Err(e) => tracing::warn!("Skipping unreadable template: {e}"),
            }
        }
        all.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(all)
    }
}

/// `facial_<user>_<YYYYmmdd_HHMMSS>_<8 hex>.<ext>`
fn image_file_name(user_id: &str, bytes: &[u8]) -> String {
    let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    let unique = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "facial_{user_id}_{stamp}_{}.{}",
        &unique[..8],
        extension_for(bytes)
    )
}

/// Raw image persistence keyed by opaque references.
pub trait ImageStore: Send + Sync {
    /// Store the bytes and return a reference for later `load`/`remove`.
    fn save(&self, user_id: &str, bytes: &[u8]) -> AuthResult<String>;

    fn load(&self, image_ref: &str) -> AuthResult<Vec<u8>>;

    /// Removing an unknown reference is not an error.
    fn remove(&self, image_ref: &str) -> AuthResult<()>;
}

/// Images on disk under `<root>/facial_images/`. References are root-relative paths.
#[derive(Debug, Clone)]
pub struct FsImageStore {
    root: PathBuf,
}

impl FsImageStore {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    fn resolve(&self, image_ref: &str) -> AuthResult<PathBuf> {
        let rel = Path::new(image_ref);
        let confined = rel
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !confined || !rel.starts_with(IMAGE_DIR) {
            return Err(AuthError::Storage(format!(
                "image reference outside the image store: {image_ref}"
            )));
        }
        Ok(self.root.join(rel))
    }
}

impl ImageStore for FsImageStore {
    fn save(&self, user_id: &str, bytes: &[u8]) -> AuthResult<String> {
        validate_user_id(user_id)?;
        let dir = self.root.join(IMAGE_DIR);
        fs::create_dir_all(&dir)?;
        let name = image_file_name(user_id, bytes);
        fs::write(dir.join(&name), bytes)?;
        Ok(format!("{IMAGE_DIR}/{name}"))
    }

    fn load(&self, image_ref: &str) -> AuthResult<Vec<u8>> {
        let path = self.resolve(image_ref)?;
        fs::read(&path).map_err(|e| {
            AuthError::Storage(format!("cannot read image {}: {e}", path.display()))
        })
    }

    fn remove(&self, image_ref: &str) -> AuthResult<()> {
        let path = self.resolve(image_ref)?;
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryImageStore {
    images: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryImageStore {
    pub fn len(&self) -> usize {
        self.images.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ImageStore for InMemoryImageStore {
    fn save(&self, user_id: &str, bytes: &[u8]) -> AuthResult<String> {
        validate_user_id(user_id)?;
        let image_ref = format!("{IMAGE_DIR}/{}", image_file_name(user_id, bytes));
        let mut images = self.images.write().map_err(lock_poisoned)?;
        images.insert(image_ref.clone(), bytes.to_vec());
        Ok(image_ref)
    }

    fn load(&self, image_ref: &str) -> AuthResult<Vec<u8>> {
        let images = self.images.read().map_err(lock_poisoned)?;
        images
            .get(image_ref)
            .cloned()
            .ok_or_else(|| AuthError::Storage(format!("unknown image reference: {image_ref}")))
    }

    fn remove(&self, image_ref: &str) -> AuthResult<()> {
        let mut images = self.images.write().map_err(lock_poisoned)?;
        images.remove(image_ref);
        Ok(())
    }
}
