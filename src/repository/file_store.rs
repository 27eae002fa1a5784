//! File-backed persistence
//!
//! Layout: `<root>/resources/<first two id chars>/<rest of id>`, one JSON
//! document per resource. Writes go to a temp file in the shard directory and
//! are renamed into place, so a reader never sees a torn record.

use super::StoreError;
use crate::models::{factory, meta::validate_id, Resource, ResourceMap, ValidationContext};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use walkdir::WalkDir;

const RESOURCES_DIR: &str = "resources";
const TEMP_SUFFIX: &str = ".tmp";

/// Result of [`FileStore::load`]: everything that decoded, plus the last
/// per-file failure if any file was skipped.
#[derive(Debug, Default)]
pub struct Loaded {
    pub resources: ResourceMap,
    pub last_error: Option<StoreError>,
}

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resources_dir(&self) -> PathBuf {
        self.root.join(RESOURCES_DIR)
    }

    fn path_for(&self, id: &str) -> Result<PathBuf, StoreError> {
        validate_id(id)?;
        let (shard, rest) = id.split_at(2);
        Ok(self.resources_dir().join(shard.to_ascii_lowercase()).join(rest))
    }

    /// 创建根目录与 256 个分片目录（幂等）
    pub fn init(&self) -> Result<(), StoreError> {
        let dir = self.resources_dir();
        for shard in 0..=255u8 {
            let path = dir.join(format!("{:02x}", shard));
            fs::create_dir_all(&path).map_err(|e| StoreError::io(&path, e))?;
        }
        Ok(())
    }

    /// Writes `resource`, replacing an existing record with the same id.
    pub fn create(&self, resource: &Resource) -> Result<(), StoreError> {
        let path = self.path_for(resource.id())?;
        if path.exists() {
            return self.update(resource);
        }
        self.write_atomic(&path, resource)
    }

    pub fn update(&self, resource: &Resource) -> Result<(), StoreError> {
        let path = self.path_for(resource.id())?;
        self.delete_path(&path)?;
        self.write_atomic(&path, resource)
    }

    /// Unlinks the record; a missing file is not an error.
    pub fn delete(&self, id: &str) -> Result<(), StoreError> {
        let path = self.path_for(id)?;
        self.delete_path(&path)
    }

    fn delete_path(&self, path: &Path) -> Result<(), StoreError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    fn write_atomic(&self, path: &Path, resource: &Resource) -> Result<(), StoreError> {
        let dir = path
            .parent()
            .ok_or_else(|| StoreError::Load {
                path: path.display().to_string(),
                reason: "record path has no parent".to_string(),
            })?;
        fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;

        let bytes = serde_json::to_vec_pretty(resource)?;

        // NamedTempFile 在 drop 时删除自身，任何一步失败都不会留下临时文件
        let mut tmp = tempfile::Builder::new()
            .suffix(TEMP_SUFFIX)
            .tempfile_in(dir)
            .map_err(|e| StoreError::io(dir, e))?;
        write_and_restrict(&mut tmp, &bytes).map_err(|e| StoreError::io(tmp.path(), e))?;
        tmp.persist(path)
            .map_err(|e| StoreError::io(path, e.error))?;

        debug!(id = %resource.id(), path = %path.display(), "resource persisted");
        Ok(())
    }

    /// 删除整个 resources 目录
    pub fn wipe(&self) -> Result<(), StoreError> {
        let dir = self.resources_dir();
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(&dir, e)),
        }
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        self.wipe()?;
        self.init()
    }

    /// Decodes every record under the shard tree. Files that fail to read,
    /// decode or validate are skipped and logged; the last such failure is
    /// returned alongside the records that did load.
    pub fn load(&self, ctx: &ValidationContext) -> Loaded {
        let mut loaded = Loaded::default();

        for entry in WalkDir::new(self.resources_dir()).min_depth(2).max_depth(2) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e
                        .path()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default();
                    warn!(path = %path, error = %e, "failed to walk store directory");
                    loaded.last_error = Some(StoreError::Load {
                        path,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            if !entry.file_type().is_file() || is_temp(entry.path()) {
                continue;
            }

            match read_record(entry.path(), ctx) {
                Ok(resource) => loaded.resources.add(resource),
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "skipping unreadable resource file");
                    loaded.last_error = Some(e);
                }
            }
        }

        loaded
    }

    /// Whether the root accepts writes.
    pub fn is_writable(&self) -> bool {
        let dir = self.resources_dir();
        tempfile::Builder::new()
            .suffix(TEMP_SUFFIX)
            .tempfile_in(&dir)
            .is_ok()
    }
}

fn write_and_restrict(tmp: &mut NamedTempFile, bytes: &[u8]) -> std::io::Result<()> {
    tmp.write_all(bytes)?;
    tmp.flush()?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

fn is_temp(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(TEMP_SUFFIX) || n.starts_with(".tmp"))
}

fn read_record(path: &Path, ctx: &ValidationContext) -> Result<Resource, StoreError> {
    let load_err = |reason: String| StoreError::Load {
        path: path.display().to_string(),
        reason,
    };

    let bytes = fs::read(path).map_err(|e| StoreError::io(path, e))?;
    let value: serde_json::Value =
        serde_json::from_slice(&bytes).map_err(|e| load_err(e.to_string()))?;
    let resource = factory()
        .decode(value)
        .map_err(|e| load_err(e.to_string()))?;
    resource
        .validate(ctx)
        .map_err(|e| load_err(e.to_string()))?;

    // 文件名必须与记录 id 对应，否则索引与磁盘会失配
    let expected = expected_file_name(resource.id());
    let actual = path
        .parent()
        .and_then(|p| p.file_name())
        .map(|shard| shard.to_string_lossy().to_string())
        .unwrap_or_default()
        + &path.file_name().map(|f| f.to_string_lossy().to_string()).unwrap_or_default();
    if actual != expected {
        return Err(load_err(format!(
            "file name does not match resource id {}",
            resource.id()
        )));
    }

    Ok(resource)
}

fn expected_file_name(id: &str) -> String {
    let (shard, rest) = id.split_at(2);
    format!("{}{}", shard.to_ascii_lowercase(), rest)
}
