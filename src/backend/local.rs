use super::{
    split_developer, Backend, InstallFlags, InstalledSnap, Meter, PurgeFlags, RemoveFlags,
};
use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const DEFAULT_CHANNEL: &str = "stable";

/// snap name -> channel -> version
type Catalog = BTreeMap<String, BTreeMap<String, String>>;

#[derive(Debug, Default, Serialize, Deserialize)]
struct SnapDb {
    #[serde(default)]
    snaps: BTreeMap<String, SnapEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SnapEntry {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    developer: String,

    /// In install order, oldest first
    #[serde(default)]
    revisions: Vec<Revision>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    active: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Revision {
    version: String,
    channel: String,
}

impl SnapEntry {
    fn revision(&self, version: &str) -> Option<&Revision> {
        self.revisions.iter().find(|r| r.version == version)
    }
}

/// Filesystem backend.
///
/// Layout under `root`:
/// - `catalog.toml`: versions available per snap and channel
/// - `snaps.json`: installed revisions and the active one per snap
/// - `snaps/<name>/<version>/`: revision contents
/// - `data/<name>/<version>/`: revision data, kept until purged
pub struct LocalBackend {
    root: PathBuf,
    lock: Mutex<()>,
}

impl LocalBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Installed versions of `name`, oldest first
    pub fn installed_versions(&self, name: &str) -> Result<Vec<String>> {
        let db = self.load_db()?;
        Ok(db
            .snaps
            .get(name)
            .map(|e| e.revisions.iter().map(|r| r.version.clone()).collect())
            .unwrap_or_default())
    }

    pub fn active_version(&self, name: &str) -> Result<Option<String>> {
        let db = self.load_db()?;
        Ok(db.snaps.get(name).and_then(|e| e.active.clone()))
    }

    fn snap_dir(&self, name: &str, version: &str) -> PathBuf {
        self.root.join("snaps").join(name).join(version)
    }

    fn data_root(&self, name: &str) -> PathBuf {
        self.root.join("data").join(name)
    }

    fn load_catalog(&self) -> Result<Catalog> {
        let path = self.root.join("catalog.toml");
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Catalog::new()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("Failed to read catalog: {}", path.display()));
            }
        };

        toml::from_str(&raw).with_context(|| format!("Failed to parse catalog: {}", path.display()))
    }

    fn available_version(&self, name: &str, channel: &str) -> Result<String> {
        let channel = if channel.is_empty() {
            DEFAULT_CHANNEL
        } else {
            channel
        };

        self.load_catalog()?
            .get(name)
            .and_then(|channels| channels.get(channel))
            .cloned()
            .with_context(|| format!("{name} is not available in channel {channel}"))
            .and_then(|version| {
                validate_path_part("version", &version)?;
                Ok(version)
            })
    }

    fn load_db(&self) -> Result<SnapDb> {
        let path = self.root.join("snaps.json");
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(SnapDb::default()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("Failed to read snap db: {}", path.display()));
            }
        };

        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse snap db: {}", path.display()))
    }

    fn save_db(&self, db: &SnapDb) -> Result<()> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("Failed to create {}", self.root.display()))?;

        let path = self.root.join("snaps.json");
        let tmp = self.root.join("snaps.json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(db)?)
            .with_context(|| format!("Failed to write snap db: {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to replace snap db: {}", path.display()))?;

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn install_revision(
        &self,
        db: &mut SnapDb,
        name: &str,
        developer: &str,
        version: &str,
        channel: &str,
        flags: InstallFlags,
        meter: &mut dyn Meter,
    ) -> Result<InstalledSnap> {
        let channel = if channel.is_empty() {
            DEFAULT_CHANNEL
        } else {
            channel
        };

        log::info!("→ Installing {} {} ({})...", name, version, channel);
        meter.start(&format!("Installing {name} {version}"), 3);

        let dir = self.snap_dir(name, version);
        fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        fs::write(dir.join("channel"), channel)
            .with_context(|| format!("Failed to write {}", dir.join("channel").display()))?;
        meter.set(1);

        let data = self.data_root(name).join(version);
        fs::create_dir_all(&data)
            .with_context(|| format!("Failed to create {}", data.display()))?;
        meter.set(2);

        let entry = db.snaps.entry(name.to_string()).or_default();
        if !developer.is_empty() {
            entry.developer = developer.to_string();
        }
        entry.revisions.push(Revision {
            version: version.to_string(),
            channel: channel.to_string(),
        });
        entry.active = Some(version.to_string());

        if flags.contains(InstallFlags::DO_INSTALL_GC) {
            let stale: Vec<String> = entry
                .revisions
                .iter()
                .filter(|r| r.version != version)
                .map(|r| r.version.clone())
                .collect();
            for old in &stale {
                log::debug!("Removing old revision {} {}", name, old);
                remove_dir_if_exists(&self.snap_dir(name, old))?;
            }
            entry.revisions.retain(|r| r.version == version);
        }
        meter.set(3);
        meter.finished();

        log::info!("✓ {} {} installed", name, version);
        Ok(InstalledSnap {
            name: name.to_string(),
            version: version.to_string(),
            channel: channel.to_string(),
        })
    }
}

impl Backend for LocalBackend {
    fn install(
        &self,
        name: &str,
        channel: &str,
        flags: InstallFlags,
        meter: &mut dyn Meter,
    ) -> Result<InstalledSnap> {
        let (base, developer) = split_developer(name);
        validate_snap_name(base)?;
        let _guard = self.lock.lock();
        let mut db = self.load_db()?;
        let version = self.available_version(base, channel)?;

        if let Some(entry) = db.snaps.get(base) {
            check_developer(entry, base, developer)?;
            if entry.revision(&version).is_some() {
                bail!("{} {} is already installed", base, version);
            }
        }

        let snap = self.install_revision(&mut db, base, developer, &version, channel, flags, meter)?;
        self.save_db(&db)?;
        Ok(snap)
    }

    fn update(
        &self,
        name: &str,
        channel: &str,
        flags: InstallFlags,
        meter: &mut dyn Meter,
    ) -> Result<()> {
        let (base, developer) = split_developer(name);
        validate_snap_name(base)?;
        let _guard = self.lock.lock();
        let mut db = self.load_db()?;

        let Some(entry) = db.snaps.get_mut(base) else {
            bail!("{} is not installed", base);
        };
        check_developer(entry, base, developer)?;
        let version = self.available_version(base, channel)?;

        if entry.active.as_deref() == Some(version.as_str()) {
            log::info!("✓ {} {} is up to date", base, version);
            meter.notify(&format!("{base} is up to date"));
            return Ok(());
        }

        if entry.revision(&version).is_some() {
            log::info!("→ Reactivating {} {}", base, version);
            entry.active = Some(version);
        } else {
            self.install_revision(&mut db, base, developer, &version, channel, flags, meter)?;
        }

        self.save_db(&db)
    }

    fn remove(&self, name: &str, flags: RemoveFlags, meter: &mut dyn Meter) -> Result<()> {
        validate_snap_name(name)?;
        let _guard = self.lock.lock();
        let mut db = self.load_db()?;

        let Some(entry) = db.snaps.get_mut(name) else {
            bail!("{} is not installed", name);
        };

        let doomed: Vec<String> = if flags.contains(RemoveFlags::DO_REMOVE_GC) {
            entry.revisions.iter().map(|r| r.version.clone()).collect()
        } else {
            match &entry.active {
                Some(active) => vec![active.clone()],
                None => bail!("{} has no active revision to remove", name),
            }
        };

        log::info!("→ Removing {} ({})...", name, doomed.join(", "));
        meter.start(&format!("Removing {name}"), doomed.len() as u64);
        for (i, version) in doomed.iter().enumerate() {
            remove_dir_if_exists(&self.snap_dir(name, version))?;
            meter.set(i as u64 + 1);
        }

        entry.revisions.retain(|r| !doomed.contains(&r.version));
        entry.active = entry.revisions.last().map(|r| r.version.clone());
        let now_empty = entry.revisions.is_empty();

        if now_empty {
            db.snaps.remove(name);
            remove_dir_if_exists(&self.root.join("snaps").join(name))?;
        }
        self.save_db(&db)?;
        meter.finished();

        log::info!("✓ {} removed", name);
        Ok(())
    }

    fn purge(&self, name: &str, flags: PurgeFlags, meter: &mut dyn Meter) -> Result<()> {
        validate_snap_name(name)?;
        let _guard = self.lock.lock();
        let db = self.load_db()?;
        let data_root = self.data_root(name);

        let mut versions = Vec::new();
        match fs::read_dir(&data_root) {
            Ok(entries) => {
                for entry in entries {
                    let entry = entry
                        .with_context(|| format!("Failed to read {}", data_root.display()))?;
                    versions.push(entry.file_name().to_string_lossy().into_owned());
                }
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("Failed to read {}", data_root.display()));
            }
        }
        versions.sort();

        if versions.is_empty() {
            if !db.snaps.contains_key(name) {
                bail!("no data to purge for {}", name);
            }
            log::info!("✓ {} has no data to purge", name);
            meter.notify(&format!("{name} has no data to purge"));
            return Ok(());
        }

        let active = db.snaps.get(name).and_then(|e| e.active.as_deref());
        if let Some(active) = active {
            if versions.iter().any(|v| v == active) && !flags.contains(PurgeFlags::DO_PURGE_ACTIVE)
            {
                bail!("cannot purge data of active snap {} {}", name, active);
            }
        }

        log::info!("→ Purging data of {} ({})...", name, versions.join(", "));
        meter.start(&format!("Purging {name}"), versions.len() as u64);
        for (i, version) in versions.iter().enumerate() {
            remove_dir_if_exists(&data_root.join(version))?;
            meter.set(i as u64 + 1);
        }
        remove_dir_if_exists(&data_root)?;
        meter.finished();

        log::info!("✓ {} purged", name);
        Ok(())
    }

    fn rollback(&self, name: &str, version: &str, meter: &mut dyn Meter) -> Result<InstalledSnap> {
        validate_snap_name(name)?;
        let _guard = self.lock.lock();
        let mut db = self.load_db()?;

        let Some(entry) = db.snaps.get_mut(name) else {
            bail!("{} is not installed", name);
        };
        let Some(active) = entry.active.clone() else {
            bail!("{} is not active", name);
        };

        let target = if version.is_empty() {
            match entry.revisions.iter().position(|r| r.version == active) {
                Some(pos) if pos > 0 => entry.revisions[pos - 1].clone(),
                _ => bail!("no previous revision of {} to roll back to", name),
            }
        } else {
            if version == active {
                bail!("{} {} is already active", name, version);
            }
            entry
                .revision(version)
                .cloned()
                .with_context(|| format!("{name} {version} is not installed"))?
        };

        log::info!("→ Rolling back {} from {} to {}", name, active, target.version);
        meter.start(&format!("Rolling back {name}"), 1);
        entry.active = Some(target.version.clone());
        self.save_db(&db)?;
        meter.set(1);
        meter.finished();

        Ok(InstalledSnap {
            name: name.to_string(),
            version: target.version,
            channel: target.channel,
        })
    }

    fn set_active(&self, name: &str, active: bool, meter: &mut dyn Meter) -> Result<()> {
        validate_snap_name(name)?;
        let _guard = self.lock.lock();
        let mut db = self.load_db()?;

        let Some(entry) = db.snaps.get_mut(name) else {
            bail!("{} is not installed", name);
        };

        if active {
            if entry.active.is_some() {
                meter.notify(&format!("{name} is already active"));
                return Ok(());
            }
            entry.active = entry.revisions.last().map(|r| r.version.clone());
            log::info!("✓ {} activated", name);
        } else {
            entry.active = None;
            log::info!("✓ {} deactivated", name);
        }

        self.save_db(&db)
    }
}

/// Refuse a developer other than the one `entry` was installed from
fn check_developer(entry: &SnapEntry, base: &str, developer: &str) -> Result<()> {
    if !entry.developer.is_empty() && !developer.is_empty() && entry.developer != developer {
        bail!(
            "{} is already installed from developer {}",
            base,
            entry.developer
        );
    }
    Ok(())
}

/// Snap names become directory names under the backend root
fn validate_snap_name(name: &str) -> Result<()> {
    validate_path_part("snap name", name)
}

fn validate_path_part(what: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("{what} must not be empty");
    }
    if value.contains('/') || value.contains('\\') {
        bail!("{what} must not contain path separators: {value}");
    }
    if value == "." || value.contains("..") {
        bail!("{what} must not contain '..': {value}");
    }
    Ok(())
}

fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("Failed to remove {}", path.display())),
    }
}
