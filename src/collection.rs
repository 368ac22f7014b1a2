// AudioCollection: loads mod-layered JSON sound
// definitions into a map keyed by a u64 key id (hex
// or hashed string keys both resolve through `crate::hash`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{AudioError, AudioResult};
use crate::hash::{resolve_key_id, retranslate_hex_code};

#[derive(Clone, Copy, PartialEq, Eq, Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum AudioDefinitionType {
    Music,
    Jingle,
    Sound,
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum Package {
    Original,
    Remastered,
    Modded,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum SourceType {
    File,
    EmulationBuffered,
    EmulationDirect,
    EmulationContinuous,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Visibility {
    Visible,
    Hidden,
    DevMode,
    Auto,
}

impl Visibility {
    fn parse(s: &str) -> Self {
        match s {
            "hidden" => Visibility::Hidden,
            "devmode" => Visibility::DevMode,
            "auto" => Visibility::Auto,
            _ => Visibility::Visible,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SourceRegistration {
    pub package: Package,
    pub source_type: SourceType,
    pub source_file: Option<PathBuf>,
    pub emulation_sfx_id: Option<u8>,
    pub source_address: Option<u32>,
    pub content_offset: Option<u32>,
    pub is_looping: bool,
    pub loop_start: Option<u32>,
    pub volume: f32,
}

#[derive(Clone, Debug)]
pub struct AudioDefinition {
    pub key_id: u64,
    pub key_string: String,
    pub display_name: String,
    pub definition_type: AudioDefinitionType,
    pub channel: u8,
    pub visibility: Visibility,
    pub sources: Vec<SourceRegistration>,
    pub active_source: Option<usize>,
}

impl AudioDefinition {
    pub fn active_source_registration(&self) -> Option<&SourceRegistration> {
        self.active_source.and_then(|i| self.sources.get(i))
    }
}

#[derive(Deserialize)]
struct RawEntry {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Type")]
    definition_type: AudioDefinitionType,
    #[serde(rename = "Source")]
    source: Option<SourceType>,
    #[serde(rename = "File")]
    file: Option<String>,
    #[serde(rename = "Address")]
    address: Option<String>,
    #[serde(rename = "ContentOffset")]
    content_offset: Option<String>,
    #[serde(rename = "EmulatedID")]
    emulated_id: Option<String>,
    #[serde(rename = "Channel")]
    channel: Option<String>,
    #[serde(rename = "LoopStart")]
    loop_start: Option<String>,
    #[serde(rename = "Volume")]
    volume: Option<String>,
    #[serde(rename = "SoundTestVisibility")]
    visibility: Option<String>,
}

fn parse_hex_u32(s: &str) -> Option<u32> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u32::from_str_radix(s, 16).ok()
}

pub struct AudioCollection {
    definitions: HashMap<u64, AudioDefinition>,
    change_counter: u64,
}

impl AudioCollection {
    pub fn new() -> Self {
        Self { definitions: HashMap::new(), change_counter: 0 }
    }

    pub fn change_counter(&self) -> u64 {
        self.change_counter
    }

    pub fn clear_package(&mut self, package: Package) {
        let mut touched = false;
        self.definitions.retain(|_, def| {
            def.sources.retain(|s| s.package != package);
            touched |= def.sources.is_empty();
            !def.sources.is_empty()
        });
        self.definitions.values_mut().for_each(|def| {
            if def.active_source.map(|i| i >= def.sources.len()).unwrap_or(false) {
                def.active_source = None;
            }
        });
        if touched {
            self.change_counter += 1;
        }
    }

    /// Loads `<base_path>/<filename>`, tagging every registration with
    /// `package`. Malformed entries are logged and skipped; the rest of
    /// the file still loads (config errors never abort a load).
    pub fn load_from_json(&mut self, base_path: &Path, filename: &str, package: Package) -> AudioResult<()> {
        let full_path = base_path.join(filename);
        let text = std::fs::read_to_string(&full_path).map_err(|_| AudioError::ResourceMissing { path: full_path.clone() })?;
        let raw: HashMap<String, RawEntry> = serde_json::from_str(&text).map_err(|e| AudioError::Config {
            file: full_path.clone(),
            reason: e.to_string(),
        })?;

        for (key, entry) in raw {
            let key_id = resolve_key_id(&key);
            let source_type = entry.source.unwrap_or(if entry.file.is_some() {
                SourceType::File
            } else {
                SourceType::EmulationBuffered
            });

            if source_type != SourceType::File && entry.address.is_some() && entry.file.is_some() {
                log::warn!("collection entry '{key}' in {filename}: Address set on a File source, ignoring Address");
            }

            let channel = match entry.definition_type {
                AudioDefinitionType::Music | AudioDefinitionType::Jingle => 0,
                AudioDefinitionType::Sound => entry
                    .channel
                    .as_deref()
                    .and_then(parse_hex_u32)
                    .unwrap_or(0) as u8,
            };

            let registration = SourceRegistration {
                package,
                source_type,
                source_file: entry.file.map(|f| base_path.join(f)),
                emulation_sfx_id: entry.emulated_id.as_deref().and_then(parse_hex_u32).map(|v| v as u8),
                source_address: entry.address.as_deref().and_then(parse_hex_u32),
                content_offset: entry.content_offset.as_deref().and_then(parse_hex_u32),
                is_looping: matches!(entry.definition_type, AudioDefinitionType::Music),
                loop_start: entry.loop_start.as_deref().and_then(|s| s.parse::<u32>().ok()),
                volume: entry.volume.as_deref().and_then(|s| s.parse::<f32>().ok()).unwrap_or(1.0),
            };

            let def = self.definitions.entry(key_id).or_insert_with(|| AudioDefinition {
                key_id,
                key_string: key.clone(),
                display_name: entry.name.clone(),
                definition_type: entry.definition_type,
                channel,
                visibility: entry
                    .visibility
                    .as_deref()
                    .map(Visibility::parse)
                    .unwrap_or(Visibility::Visible),
                sources: Vec::new(),
                active_source: None,
            });
            def.sources.push(registration);
        }

        self.change_counter += 1;
        Ok(())
    }

    /// Chooses one active source per definition: modded beats all;
    /// otherwise remastered beats original unless `prefer_original`;
    /// later-registered modded entries win ties.
    pub fn determine_active_source_registrations(&mut self, prefer_original: bool) {
        for def in self.definitions.values_mut() {
            let mut best_index = None;
            for (i, reg) in def.sources.iter().enumerate() {
                let better = match best_index {
                    None => true,
                    Some(bi) => {
                        let current: &SourceRegistration = &def.sources[bi];
                        rank(reg.package, prefer_original) >= rank(current.package, prefer_original)
                    }
                };
                if better {
                    best_index = Some(i);
                }
            }
            def.active_source = best_index;
        }
        self.change_counter += 1;
    }

    /// Looks up a definition by key id directly; if that misses and
    /// `key_id` happens to be the murmur2_64 hash of a two-hex-digit byte
    /// string, retries with the numeric byte value instead - a caller may
    /// have hashed the hex string rather than passing the key id itself.
    pub fn get_audio_definition(&self, key_id: u64) -> Option<&AudioDefinition> {
        if let Some(def) = self.definitions.get(&key_id) {
            return Some(def);
        }
        let retranslated = retranslate_hex_code(key_id)?;
        self.definitions.get(&retranslated)
    }

    /// Accepts either a pre-hashed key id or the two-hex-digit/string key
    /// representation.
    pub fn get_audio_definition_by_key(&self, key: &str) -> Option<&AudioDefinition> {
        self.get_audio_definition(resolve_key_id(key))
    }

    pub fn get_source_registration(&self, key_id: u64, preferred_package: Option<Package>) -> Option<&SourceRegistration> {
        let def = self.definitions.get(&key_id)?;
        if let Some(pkg) = preferred_package {
            if let Some(reg) = def.sources.iter().find(|r| r.package == pkg) {
                return Some(reg);
            }
        }
        def.active_source_registration()
    }

    /// Walks `base_path` for mod packages: every immediate subdirectory
    /// named `original`, `remastered`, or `modded` (case-insensitive)
    /// that contains `filename` is loaded and tagged with the matching
    /// `Package`. Unrecognized subdirectories and I/O errors on
    /// individual entries are logged and skipped rather than aborting
    /// the whole scan.
    pub fn load_all_packages(&mut self, base_path: &Path, filename: &str) {
        for entry in walkdir::WalkDir::new(base_path).min_depth(1).max_depth(1) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    log::warn!("package scan under {}: {e}", base_path.display());
                    continue;
                }
            };
            if !entry.file_type().is_dir() {
                continue;
            }
            let Some(package) = package_for_dir_name(entry.file_name().to_string_lossy().as_ref()) else {
                continue;
            };
            if let Err(e) = self.load_from_json(entry.path(), filename, package) {
                log::warn!("skipping package dir {}: {e}", entry.path().display());
            }
        }
    }

    #[cfg(test)]
    pub fn test_insert(&mut self, key_id: u64, def: AudioDefinition) {
        self.definitions.insert(key_id, def);
    }
}

fn package_for_dir_name(name: &str) -> Option<Package> {
    match name.to_ascii_lowercase().as_str() {
        "original" => Some(Package::Original),
        "remastered" => Some(Package::Remastered),
        "modded" => Some(Package::Modded),
        _ => None,
    }
}

fn rank(package: Package, prefer_original: bool) -> u8 {
    match package {
        Package::Modded => 2,
        Package::Remastered => {
            if prefer_original {
                0
            } else {
                1
            }
        }
        Package::Original => {
            if prefer_original {
                1
            } else {
                0
            }
        }
    }
}

impl Default for AudioCollection {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def_with(packages: &[Package]) -> AudioDefinition {
        AudioDefinition {
            key_id: 1,
            key_string: "bgm".into(),
            display_name: "BGM".into(),
            definition_type: AudioDefinitionType::Music,
            channel: 0,
            visibility: Visibility::Visible,
            sources: packages
                .iter()
                .map(|&package| SourceRegistration {
                    package,
                    source_type: SourceType::File,
                    source_file: None,
                    emulation_sfx_id: None,
                    source_address: None,
                    content_offset: None,
                    is_looping: true,
                    loop_start: None,
                    volume: 1.0,
                })
                .collect(),
            active_source: None,
        }
    }

    #[test]
    fn modded_wins_over_everything() {
        let mut coll = AudioCollection::new();
        coll.definitions.insert(1, def_with(&[Package::Original, Package::Remastered, Package::Modded]));
        coll.determine_active_source_registrations(false);
        assert_eq!(coll.get_source_registration(1, None).unwrap().package, Package::Modded);
    }

    #[test]
    fn remastered_wins_unless_prefer_original() {
        let mut coll = AudioCollection::new();
        coll.definitions.insert(1, def_with(&[Package::Original, Package::Remastered]));
        coll.determine_active_source_registrations(false);
        assert_eq!(coll.get_source_registration(1, None).unwrap().package, Package::Remastered);

        coll.determine_active_source_registrations(true);
        assert_eq!(coll.get_source_registration(1, None).unwrap().package, Package::Original);
    }

    #[test]
    fn hex_key_and_hashed_string_key_resolve_to_the_same_definition() {
        let mut coll = AudioCollection::new();
        let key_id = resolve_key_id("2c");
        coll.definitions.insert(key_id, def_with(&[Package::Original]));
        assert!(coll.get_audio_definition_by_key("2C").is_some());
        assert_eq!(
            coll.get_audio_definition_by_key("2C").unwrap().key_id,
            coll.get_audio_definition_by_key("2c").unwrap().key_id
        );
    }

    #[test]
    fn get_audio_definition_retranslates_a_hashed_hex_key() {
        let mut coll = AudioCollection::new();
        coll.definitions.insert(0x2c, def_with(&[Package::Original]));
        assert!(coll.get_audio_definition(0x2c).is_some());
        // A caller that hashed the hex string directly (instead of passing
        // the numeric key id) must still resolve to the same definition.
        let hashed = crate::hash::hash_key_string("2c");
        assert_eq!(
            coll.get_audio_definition(0x2c).unwrap().key_id,
            coll.get_audio_definition(hashed).unwrap().key_id
        );
    }

    #[test]
    fn load_all_packages_scans_known_subdirectories_only() {
        let dir = std::env::temp_dir().join(format!("gac-test-{}", resolve_key_id("load_all_packages_scans_known_subdirectories_only")));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(dir.join("original")).unwrap();
        std::fs::create_dir_all(dir.join("modded")).unwrap();
        std::fs::create_dir_all(dir.join("readme_not_a_package")).unwrap();
        std::fs::write(
            dir.join("original").join("sounds.json"),
            r#"{"01": {"Name": "Ring", "Type": "Sound", "Source": "File", "File": "ring.ogg"}}"#,
        )
        .unwrap();
        std::fs::write(
            dir.join("modded").join("sounds.json"),
            r#"{"01": {"Name": "Ring (HD)", "Type": "Sound", "Source": "File", "File": "ring_hd.ogg"}}"#,
        )
        .unwrap();

        let mut coll = AudioCollection::new();
        coll.load_all_packages(&dir, "sounds.json");
        coll.determine_active_source_registrations(false);

        let def = coll.get_audio_definition_by_key("01").unwrap();
        assert_eq!(def.sources.len(), 2);
        assert_eq!(coll.get_source_registration(def.key_id, None).unwrap().package, Package::Modded);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn loading_missing_file_is_resource_missing() {
        let mut coll = AudioCollection::new();
        let err = coll
            .load_from_json(Path::new("/nonexistent"), "sounds.json", Package::Original)
            .unwrap_err();
        matches!(err, AudioError::ResourceMissing { .. });
    }
}
