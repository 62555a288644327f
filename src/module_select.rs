//! Module Selector (§4.4): picks the best available output module for a
//! detected source module type.
//!
//! Grounded on `MidiModules.hpp`'s `MidiModule`/`MidiModuleCollection`: a
//! module advertises the `playType` ids it can faithfully render; the
//! selector returns the first exact match, then the first approximate
//! match. The symbolic wildcard expansion (`"SC-xx"`, `"MUxx"`, `"0x1#"`,
//! `"0x2#"`) named in §6 is implemented here rather than in the registry
//! construction, so callers can hand it raw strings straight from a config
//! file.

use crate::module_type::{Family, ModuleType};

#[derive(Debug, Clone)]
pub struct ModuleConfig {
    pub display_name: String,
    pub mod_type: ModuleType,
    pub output_port_ids: Vec<u32>,
    pub play_types: Vec<ModuleType>,
}

#[derive(Debug, Clone, Default)]
pub struct ModuleRegistry {
    modules: Vec<ModuleConfig>,
}

/// Expands a symbolic wildcard (§6) into the set of module types it names.
/// Returns `None` if `token` isn't a recognized wildcard (the caller should
/// then parse it as one literal module name).
pub fn expand_wildcard(token: &str) -> Option<Vec<ModuleType>> {
    match token {
        "SC-xx" => Some(vec![
            ModuleType::Sc55,
            ModuleType::Sc88,
            ModuleType::Sc88Pro,
            ModuleType::Sc8850,
        ]),
        "MUxx" => Some(vec![
            ModuleType::Mu50,
            ModuleType::Mu80,
            ModuleType::Mu90,
            ModuleType::Mu100,
            ModuleType::Mu128,
            ModuleType::Mu1000,
        ]),
        "0x1#" => Some(vec![
            ModuleType::Sc55,
            ModuleType::Sc88,
            ModuleType::Sc88Pro,
            ModuleType::Sc8850,
            ModuleType::Tg300B,
        ]),
        "0x2#" => Some(vec![
            ModuleType::Mu50,
            ModuleType::Mu80,
            ModuleType::Mu90,
            ModuleType::Mu100,
            ModuleType::Mu128,
            ModuleType::Mu1000,
        ]),
        _ => None,
    }
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, module: ModuleConfig) {
        self.modules.push(module);
    }

    pub fn modules(&self) -> &[ModuleConfig] {
        &self.modules
    }

    /// First exact match, else first approximate match (same family, or any
    /// GS/XG target for a GM source).
    pub fn select(&self, source: ModuleType) -> Option<&ModuleConfig> {
        if let Some(exact) = self.modules.iter().find(|m| m.play_types.contains(&source)) {
            return Some(exact);
        }

        self.modules.iter().find(|m| approximate_match(source, m))
    }
}

fn approximate_match(source: ModuleType, module: &ModuleConfig) -> bool {
    if module.play_types.iter().any(|t| t.family() == source.family()) {
        return true;
    }
    if source.family() == Family::Gm {
        return module
            .play_types
            .iter()
            .any(|t| matches!(t.family(), Family::Gs | Family::Xg));
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(name: &str, mod_type: ModuleType, plays: &[ModuleType]) -> ModuleConfig {
        ModuleConfig {
            display_name: name.to_string(),
            mod_type,
            output_port_ids: vec![0],
            play_types: plays.to_vec(),
        }
    }

    #[test]
    fn exact_match_preferred() {
        let mut reg = ModuleRegistry::new();
        reg.add(module("sc55", ModuleType::Sc55, &[ModuleType::Sc55]));
        reg.add(module("sc88", ModuleType::Sc88, &[ModuleType::Sc88]));
        let chosen = reg.select(ModuleType::Sc88).unwrap();
        assert_eq!(chosen.display_name, "sc88");
    }

    #[test]
    fn gm_source_accepts_any_gs_or_xg() {
        let mut reg = ModuleRegistry::new();
        reg.add(module("mu50", ModuleType::Mu50, &[ModuleType::Mu50]));
        let chosen = reg.select(ModuleType::Gm1).unwrap();
        assert_eq!(chosen.display_name, "mu50");
    }

    #[test]
    fn wildcard_expansion_covers_gs_family() {
        let expanded = expand_wildcard("SC-xx").unwrap();
        assert!(expanded.contains(&ModuleType::Sc8850));
        assert_eq!(expanded.len(), 4);
    }

    #[test]
    fn no_match_returns_none() {
        let reg = ModuleRegistry::new();
        assert!(reg.select(ModuleType::Gm1).is_none());
    }
}
