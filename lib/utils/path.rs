use std::path::{Path, PathBuf};

use tokio::fs;

use crate::{management::User, LabdockResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The sub directory of a user workspace mounted read-write into the sandbox.
pub const WORK_SUBDIR: &str = "work";

/// The sub directory of a user workspace holding uploaded models, mounted read-only.
pub const MODELS_SUBDIR: &str = "models";

/// The sub directory of a user workspace holding datasets, mounted read-only.
pub const DATA_SUBDIR: &str = "data";

/// Where the work directory lands inside the notebook container.
pub const GUEST_WORK_DIR: &str = "/home/jovyan/work";

/// Where the models directory lands inside the notebook container.
pub const GUEST_MODELS_DIR: &str = "/home/jovyan/models";

/// Where the data directory lands inside the notebook container.
pub const GUEST_DATA_DIR: &str = "/home/jovyan/data";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The per-user host directories mounted into a sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserDirs {
    /// The read-write notebook work directory.
    pub work: PathBuf,

    /// The read-only models directory.
    pub models: PathBuf,

    /// The read-only data directory.
    pub data: PathBuf,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns the workspace root for a user under the configured data directory.
pub fn user_workspace_dir(data_dir: &Path, user: &User) -> PathBuf {
    data_dir.join(format!("user_{}_{}", user.id, user.username))
}

/// Packs a directory into an uncompressed tar archive in memory.
///
/// Blocking; callers run this on the blocking pool. Used to ship image build
/// contexts to the container runtime.
pub fn tar_dir(dir: &Path) -> LabdockResult<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.append_dir_all(".", dir)?;
    let bytes = builder.into_inner()?;
    Ok(bytes)
}

/// Ensures the per-user workspace directories exist, creating them if absent.
pub async fn ensure_user_dirs(data_dir: &Path, user: &User) -> LabdockResult<UserDirs> {
    let root = user_workspace_dir(data_dir, user);

    let dirs = UserDirs {
        work: root.join(WORK_SUBDIR),
        models: root.join(MODELS_SUBDIR),
        data: root.join(DATA_SUBDIR),
    };

    fs::create_dir_all(&dirs.work).await?;
    fs::create_dir_all(&dirs.models).await?;
    fs::create_dir_all(&dirs.data).await?;

    Ok(dirs)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::management::{User, UserRole};
    use tempfile::tempdir;

    fn sample_user() -> User {
        User {
            id: 7,
            username: "ada".into(),
            cpus: 2.0,
            ram_mib: 4096,
            memswap_mib: 4096,
            gpu_access: false,
            accessible: true,
            role: UserRole::Ordinary,
        }
    }

    #[test]
    fn test_tar_dir_packs_files() {
        let tmp = tempdir().unwrap();
        std::fs::write(tmp.path().join("Dockerfile"), "FROM scratch\n").unwrap();

        let bytes = tar_dir(tmp.path()).unwrap();
        assert!(!bytes.is_empty());

        let mut archive = tar::Archive::new(bytes.as_slice());
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().display().to_string())
            .collect();
        assert!(names.iter().any(|n| n.ends_with("Dockerfile")));
    }

    #[tokio::test]
    async fn test_ensure_user_dirs_creates_all_three() {
        let tmp = tempdir().unwrap();
        let dirs = ensure_user_dirs(tmp.path(), &sample_user()).await.unwrap();

        assert!(dirs.work.is_dir());
        assert!(dirs.models.is_dir());
        assert!(dirs.data.is_dir());
        assert!(dirs.work.starts_with(tmp.path().join("user_7_ada")));
    }
}
