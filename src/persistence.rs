//! # Persistence モジュール
//!
//! ワールドイメージの読み書きを行う差し替え可能なストアです。
//! エンジンは起動時に [`WorldPersistence::load`] で復元し、
//! 一定ティックごとにロック外で [`WorldPersistence::store`] を呼びます。

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::PersistenceError;
use crate::world::WorldImage;

/// 永続化ストアのインターフェース
pub trait WorldPersistence: Send + Sync {
    /// 保存済みイメージの読み込み（未保存なら None）
    fn load(&self) -> Result<Option<WorldImage>, PersistenceError>;

    /// イメージの保存
    fn store(&self, image: &WorldImage) -> Result<(), PersistenceError>;
}

/// 永続化なし
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPersistence;

impl WorldPersistence for NoPersistence {
    fn load(&self) -> Result<Option<WorldImage>, PersistenceError> {
        Ok(None)
    }

    fn store(&self, _image: &WorldImage) -> Result<(), PersistenceError> {
        Ok(())
    }
}

/// YAMLファイルへの永続化
///
/// 一時ファイルへ書き込んでからリネームするため、途中で停止しても
/// 直前のイメージが壊れることはありません。
#[derive(Debug, Clone)]
pub struct YamlFilePersistence {
    path: PathBuf,
}

impl YamlFilePersistence {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn io_error(&self, source: std::io::Error) -> PersistenceError {
        PersistenceError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl WorldPersistence for YamlFilePersistence {
    fn load(&self) -> Result<Option<WorldImage>, PersistenceError> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "永続化ファイルなし: 空のワールドで開始");
            return Ok(None);
        }
        let contents = fs::read_to_string(&self.path).map_err(|e| self.io_error(e))?;
        let image: WorldImage = serde_yaml::from_str(&contents)?;
        info!(
            path = %self.path.display(),
            subs = image.subs.len(),
            torpedoes = image.torpedoes.len(),
            "WORLD_RESTORED: ワールドを復元"
        );
        Ok(Some(image))
    }

    fn store(&self, image: &WorldImage) -> Result<(), PersistenceError> {
        let contents = serde_yaml::to_string(image)?;
        let tmp = self.path.with_extension("tmp");
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        fs::write(&tmp, contents).map_err(|e| self.io_error(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))?;
        debug!(path = %self.path.display(), subs = image.subs.len(), "WORLD_STORED");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SubmarineConfig;
    use crate::models::{Position3D, Submarine};
    use uuid::Uuid;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("subsim-{}-{}.yaml", name, std::process::id()))
    }

    #[test]
    fn test_no_persistence_is_empty() {
        assert!(NoPersistence.load().unwrap().is_none());
        assert!(NoPersistence.store(&WorldImage::default()).is_ok());
    }

    #[test]
    fn test_yaml_store_and_load() {
        let path = temp_path("store");
        let store = YamlFilePersistence::new(&path);
        assert!(store.load().unwrap().is_none());

        let mut sub = Submarine::spawn(Uuid::from_u128(5), 9, Position3D::new(1.0, 2.0, 3.0), 0.5, 70.0, 10.0, &SubmarineConfig::default());
        sub.target_depth = Some(120.0);
        let image = WorldImage {
            subs: vec![sub],
            torpedoes: Vec::new(),
        };
        store.store(&image).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded, image);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_corrupt_file_is_encoding_error() {
        let path = temp_path("corrupt");
        fs::write(&path, "subs: [not a sub").unwrap();
        let err = YamlFilePersistence::new(&path).load().unwrap_err();
        assert!(matches!(err, PersistenceError::Encoding(_)));
        let _ = fs::remove_file(&path);
    }
}
