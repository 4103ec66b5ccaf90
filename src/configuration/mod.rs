use std::path::PathBuf;

use anyhow::bail;
use anyhow::Context;
use serde::Deserialize;
use serde::Serialize;

use crate::mount_host::MountCommands;

/// Main configuration file format. Everything beyond the remote name is
/// optional: mount point directories default to ~/mnt/<..> and binaries
/// to the usual locations for the current OS.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Name of the rclone remote to mount (and to move cached writes back to).
    pub remote: String,
    /// Mount point for the read-only remote mount.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_dir: Option<String>,
    /// Writable layer on top of the remote mount; also the source directory
    /// that the move job pushes back to the remote.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<String>,
    /// Mount point for the union of cache_dir (RW) and local_dir (RO).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub union_dir: Option<String>,
    /// Bandwidth/time-window schedule handed to the move command verbatim,
    /// eg "07:00,1M 23:00,off". Not interpreted by mount-box.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub move_schedule: Option<String>,
    /// How long to sleep between move runs. Integer with optional s/m/h/d/w
    /// suffix; defaults to 6h.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub move_interval: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<LogLevel>,
    #[serde(default)]
    pub binaries: Binaries,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Binaries {
    #[serde(default = "default_rclone")]
    pub rclone: String,
    #[serde(default = "default_sudo")]
    pub sudo: String,
    #[serde(default = "default_mount")]
    pub mount: String,
    #[serde(default = "default_umount")]
    pub umount: String,
    #[serde(default = "default_lsof")]
    pub lsof: String,
    /// Only used on macos, where the union layer is a unionfs-fuse mount
    /// rather than an fstab entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unionfs: Option<String>,
}

fn default_rclone() -> String {
    "rclone".into()
}
fn default_sudo() -> String {
    "/usr/bin/sudo".into()
}
fn default_mount() -> String {
    "/usr/bin/mount".into()
}
fn default_umount() -> String {
    if cfg!(target_os = "macos") {
        "/usr/sbin/diskutil".into()
    } else {
        "/usr/bin/umount".into()
    }
}
fn default_lsof() -> String {
    if cfg!(target_os = "macos") {
        "/usr/sbin/lsof".into()
    } else {
        "/usr/bin/lsof".into()
    }
}

impl Default for Binaries {
    fn default() -> Self {
        Binaries {
            rclone: default_rclone(),
            sudo: default_sudo(),
            mount: default_mount(),
            umount: default_umount(),
            lsof: default_lsof(),
            unionfs: None,
        }
    }
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq, Hash)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl<'de> Deserialize<'de> for LogLevel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct LogLevelVisitor;

        impl<'de> serde::de::Visitor<'de> for LogLevelVisitor {
            type Value = LogLevel;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a log level (trace, debug, info, warn, error)")
            }

            fn visit_str<E>(self, value: &str) -> Result<LogLevel, E>
            where
                E: serde::de::Error,
            {
                match value.to_lowercase().as_str() {
                    "trace" => Ok(LogLevel::Trace),
                    "debug" => Ok(LogLevel::Debug),
                    "info" => Ok(LogLevel::Info),
                    "warn" => Ok(LogLevel::Warn),
                    "error" => Ok(LogLevel::Error),
                    _ => Err(E::custom(format!("unknown log level: {}", value))),
                }
            }
        }

        deserializer.deserialize_str(LogLevelVisitor)
    }
}

impl Config {
    pub fn parse(content: &str) -> anyhow::Result<Config> {
        let config: Config =
            toml::from_str(content).map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
        Ok(config)
    }

    pub fn example() -> Config {
        Config {
            remote: "GoogleDriveCrypt".into(),
            local_dir: None,
            cache_dir: None,
            union_dir: None,
            move_schedule: Some("07:00,1M 23:00,off".into()),
            move_interval: Some("6h".into()),
            log_level: Some(LogLevel::Info),
            binaries: Binaries::default(),
        }
    }

    pub fn to_string(&self) -> anyhow::Result<String> {
        toml::to_string_pretty(self).context("failed to serialize configuration")
    }

    pub fn write_to_disk(&self, path: &str) -> anyhow::Result<()> {
        std::fs::write(path, self.to_string()?)
            .with_context(|| format!("failed to write configuration file {path:?}"))?;
        Ok(())
    }

    pub fn is_valid(&self) -> anyhow::Result<()> {
        if self.remote.trim().is_empty() {
            bail!("'remote' must not be empty")
        }
        if let Some(interval) = &self.move_interval {
            crate::timespan::parse_seconds(interval)
                .with_context(|| format!("invalid move_interval {interval:?}"))?;
        }
        let local = self.resolve_local_dir()?;
        let union = self.resolve_union_dir()?;
        if local == union {
            bail!("local_dir and union_dir must not be the same directory")
        }
        Ok(())
    }

    /// Checks that every configured binary can actually be found, either as
    /// an absolute path or on PATH. Called once at startup; a missing binary
    /// here is the same misconfiguration class that would otherwise only
    /// surface when the supervision loop first tries to spawn it.
    pub fn resolve_binaries(&self) -> anyhow::Result<()> {
        let mut required = vec![
            self.binaries.rclone.as_str(),
            self.binaries.umount.as_str(),
            self.binaries.lsof.as_str(),
        ];
        if cfg!(not(target_os = "macos")) {
            required.push(self.binaries.sudo.as_str());
            required.push(self.binaries.mount.as_str());
        }
        for bin in required {
            which::which(bin).with_context(|| format!("required binary not found: {bin:?}"))?;
        }
        Ok(())
    }

    fn home_dir() -> anyhow::Result<PathBuf> {
        dirs::home_dir().context("could not resolve your home directory")
    }

    pub fn resolve_local_dir(&self) -> anyhow::Result<String> {
        match &self.local_dir {
            Some(d) => Ok(d.clone()),
            None => Ok(Self::home_dir()?
                .join("mnt")
                .join(&self.remote)
                .to_string_lossy()
                .into_owned()),
        }
    }

    pub fn resolve_cache_dir(&self) -> anyhow::Result<String> {
        match &self.cache_dir {
            Some(d) => Ok(d.clone()),
            None => Ok(Self::home_dir()?
                .join("mnt")
                .join("cache")
                .to_string_lossy()
                .into_owned()),
        }
    }

    pub fn resolve_union_dir(&self) -> anyhow::Result<String> {
        match &self.union_dir {
            Some(d) => Ok(d.clone()),
            None => Ok(Self::home_dir()?
                .join("mnt")
                .join("union")
                .to_string_lossy()
                .into_owned()),
        }
    }

    /// Command templates for the remote (read-only) rclone mount.
    pub fn remote_mount_commands(&self) -> anyhow::Result<MountCommands> {
        let local = self.resolve_local_dir()?;
        let mount = vec![
            self.binaries.rclone.clone(),
            "mount".into(),
            "--read-only".into(),
            "--allow-other".into(),
            "--no-modtime".into(),
            "--dir-cache-time=240m".into(),
            "--tpslimit=10".into(),
            "--tpslimit-burst=1".into(),
            "--buffer-size=1G".into(),
            format!("{}:", self.remote),
            local.clone(),
        ];
        Ok(MountCommands {
            mount,
            unmount: self.unmount_command(&local),
            probe: self.probe_command(&local),
        })
    }

    /// Command templates for the writable union layer stacked on top of the
    /// remote mount.
    #[cfg(not(target_os = "macos"))]
    pub fn union_mount_commands(&self) -> anyhow::Result<MountCommands> {
        let union = self.resolve_union_dir()?;
        // the union mount point is expected to have an fstab entry
        let mount = vec![
            self.binaries.sudo.clone(),
            self.binaries.mount.clone(),
            union.clone(),
        ];
        Ok(MountCommands {
            mount,
            unmount: self.unmount_command(&union),
            probe: self.probe_command(&union),
        })
    }

    #[cfg(target_os = "macos")]
    pub fn union_mount_commands(&self) -> anyhow::Result<MountCommands> {
        let union = self.resolve_union_dir()?;
        let branches = format!(
            "{}=RW:{}=RO",
            self.resolve_cache_dir()?,
            self.resolve_local_dir()?
        );
        let unionfs = self
            .binaries
            .unionfs
            .clone()
            .unwrap_or_else(|| "/usr/local/bin/unionfs".into());
        let mount = vec![
            unionfs,
            "-o".into(),
            "cow,direct_io,auto_cache".into(),
            branches,
            union.clone(),
        ];
        Ok(MountCommands {
            mount,
            unmount: self.unmount_command(&union),
            probe: self.probe_command(&union),
        })
    }

    /// Command template for one move invocation. Runs with the cache
    /// directory as working directory; the bwlimit schedule is appended
    /// later by the move host if one is configured.
    pub fn move_command(&self) -> Vec<String> {
        vec![
            self.binaries.rclone.clone(),
            "move".into(),
            ".".into(),
            format!("{}:", self.remote),
            "--exclude=.unionfs".into(),
        ]
    }

    #[cfg(not(target_os = "macos"))]
    fn unmount_command(&self, mount_point: &str) -> Vec<String> {
        vec![
            self.binaries.sudo.clone(),
            self.binaries.umount.clone(),
            mount_point.to_owned(),
        ]
    }

    #[cfg(target_os = "macos")]
    fn unmount_command(&self, mount_point: &str) -> Vec<String> {
        vec![
            self.binaries.umount.clone(),
            "unmount".into(),
            mount_point.to_owned(),
        ]
    }

    fn probe_command(&self, mount_point: &str) -> Vec<String> {
        vec![self.binaries.lsof.clone(), mount_point.to_owned()]
    }
}
