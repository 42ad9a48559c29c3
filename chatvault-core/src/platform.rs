//! Platform path resolution
//!
//! Locates the directory where the editor keeps per-workspace state:
//!
//! | Platform | Storage root |
//! |----------|--------------|
//! | darwin | `~/Library/Application Support/Code/User/workspaceStorage` |
//! | win32 | `%APPDATA%\Code\User\workspaceStorage` |
//! | linux | `~/.config/Code/User/workspaceStorage` |
//!
//! When the primary installation is missing, alternate builds (Insiders,
//! OSS, VSCodium) are tried in order by swapping the installation folder.

use crate::error::{Error, Result};
use crate::types::{Platform, PlatformConfig};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Installation folder of the stable editor build
pub const PRIMARY_VARIANT: &str = "Code";

/// Alternate installation folders, tried in order after [`PRIMARY_VARIANT`]
pub const DEFAULT_EDITOR_VARIANTS: &[&str] = &["Code - Insiders", "Code - OSS", "VSCodium"];

const USER_STORAGE_SEGMENTS: &[&str] = &["User", "workspaceStorage"];

/// Directory a platform's layout hangs off.
#[derive(Debug, Clone, Copy)]
enum Anchor {
    Home,
    AppData,
}

struct PlatformLayout {
    platform: Platform,
    anchor: Anchor,
    segments: &'static [&'static str],
}

const PLATFORM_LAYOUTS: &[PlatformLayout] = &[
    PlatformLayout {
        platform: Platform::MacOs,
        anchor: Anchor::Home,
        segments: &["Library", "Application Support"],
    },
    PlatformLayout {
        platform: Platform::Windows,
        anchor: Anchor::AppData,
        segments: &[],
    },
    PlatformLayout {
        platform: Platform::Linux,
        anchor: Anchor::Home,
        segments: &[".config"],
    },
];

/// Resolves and caches the editor's workspace storage root.
pub struct PlatformResolver {
    platform: Option<Platform>,
    os: String,
    home: Option<PathBuf>,
    app_data: Option<PathBuf>,
    storage_override: Option<PathBuf>,
    variants: Vec<String>,
    cached: Mutex<Option<PlatformConfig>>,
}

impl PlatformResolver {
    /// Create a resolver for the running OS and user.
    pub fn new() -> Self {
        let os = std::env::consts::OS;
        Self {
            platform: Platform::from_os(os),
            os: os.to_string(),
            home: dirs::home_dir(),
            app_data: std::env::var_os("APPDATA").map(PathBuf::from),
            storage_override: None,
            variants: default_variants(),
            cached: Mutex::new(None),
        }
    }

    /// Create a resolver for an explicit platform and environment (for testing).
    pub fn for_platform(
        platform: Platform,
        home: Option<PathBuf>,
        app_data: Option<PathBuf>,
    ) -> Self {
        Self {
            platform: Some(platform),
            os: platform.as_str().to_string(),
            home,
            app_data,
            storage_override: None,
            variants: default_variants(),
            cached: Mutex::new(None),
        }
    }

    /// Pin the storage root, bypassing platform layouts and variant fallback.
    pub fn with_storage_dir(mut self, dir: PathBuf) -> Self {
        self.storage_override = Some(dir);
        self
    }

    /// Replace the ordered list of alternate installation folders.
    pub fn with_variants(mut self, variants: Vec<String>) -> Self {
        self.variants = variants;
        self
    }

    fn platform(&self) -> Result<Platform> {
        self.platform
            .ok_or_else(|| Error::Platform(format!("unsupported platform: {}", self.os)))
    }

    fn lock_cache(&self) -> MutexGuard<'_, Option<PlatformConfig>> {
        self.cached.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The platform configuration, without touching the file system.
    ///
    /// Returns the cached configuration when [`Self::storage_path`] already
    /// validated one, otherwise the primary installation's layout.
    pub fn config(&self) -> Result<PlatformConfig> {
        if let Some(config) = self.lock_cache().as_ref() {
            return Ok(config.clone());
        }
        self.primary_config()
    }

    fn primary_config(&self) -> Result<PlatformConfig> {
        let platform = self.platform()?;

        if let Some(dir) = &self.storage_override {
            return Ok(PlatformConfig {
                platform,
                base_storage_dir: dir.parent().unwrap_or(dir).to_path_buf(),
                workspace_storage_dir: dir.clone(),
                separator: platform.separator(),
            });
        }

        let layout = PLATFORM_LAYOUTS
            .iter()
            .find(|l| l.platform == platform)
            .ok_or_else(|| Error::Platform(format!("no storage layout for {}", platform)))?;

        let anchor = match layout.anchor {
            Anchor::Home => self.home.clone().ok_or_else(|| {
                Error::Platform("home directory could not be determined".to_string())
            })?,
            Anchor::AppData => self.app_data.clone().ok_or_else(|| {
                Error::Platform("APPDATA environment variable is not set".to_string())
            })?,
        };

        let mut base = anchor;
        for segment in layout.segments {
            base.push(segment);
        }
        base.push(PRIMARY_VARIANT);

        Ok(config_for_base(platform, base))
    }

    /// All candidate configurations in fallback order.
    pub fn candidates(&self) -> Result<Vec<PlatformConfig>> {
        let primary = self.primary_config()?;
        if self.storage_override.is_some() {
            return Ok(vec![primary]);
        }

        let mut candidates = vec![primary.clone()];
        for variant in &self.variants {
            let base = primary.base_storage_dir.with_file_name(variant);
            candidates.push(config_for_base(primary.platform, base));
        }
        Ok(candidates)
    }

    /// Resolve the workspace storage root, falling back across installations.
    ///
    /// A candidate qualifies when it exists, is a directory and can be listed.
    pub async fn storage_path(&self) -> Result<PathBuf> {
        if let Some(config) = self.lock_cache().as_ref() {
            return Ok(config.workspace_storage_dir.clone());
        }

        let candidates = self.candidates()?;
        for candidate in &candidates {
            if is_readable_dir(&candidate.workspace_storage_dir).await {
                tracing::debug!(
                    path = %candidate.workspace_storage_dir.display(),
                    "Resolved workspace storage root"
                );
                let path = candidate.workspace_storage_dir.clone();
                *self.lock_cache() = Some(candidate.clone());
                return Ok(path);
            }
            tracing::debug!(
                path = %candidate.workspace_storage_dir.display(),
                "Workspace storage candidate not usable"
            );
        }

        let tried = candidates
            .iter()
            .map(|c| c.workspace_storage_dir.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        Err(Error::Resolution(format!(
            "no readable workspace storage directory found (tried: {})",
            tried
        )))
    }

    /// The cached configuration, if one has been validated.
    pub fn cached(&self) -> Option<PlatformConfig> {
        self.lock_cache().clone()
    }

    /// Forget the validated configuration.
    pub fn reset_cache(&self) {
        *self.lock_cache() = None;
    }
}

impl Default for PlatformResolver {
    fn default() -> Self {
        Self::new()
    }
}

fn default_variants() -> Vec<String> {
    DEFAULT_EDITOR_VARIANTS
        .iter()
        .map(|v| v.to_string())
        .collect()
}

fn config_for_base(platform: Platform, base: PathBuf) -> PlatformConfig {
    let mut storage = base.clone();
    for segment in USER_STORAGE_SEGMENTS {
        storage.push(segment);
    }
    PlatformConfig {
        platform,
        base_storage_dir: base,
        workspace_storage_dir: storage,
        separator: platform.separator(),
    }
}

async fn is_readable_dir(path: &Path) -> bool {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => tokio::fs::read_dir(path).await.is_ok(),
        _ => false,
    }
}
