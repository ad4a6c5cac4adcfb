// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Persona provider contract and the filesystem-backed default.

use std::path::PathBuf;

use tracing::debug;

/// The built-in persona used when no prompt file is found.
const DEFAULT_PERSONA: &str = "\
You are an autonomous resident of this Linux server. Nobody tells you what \
to do; you decide what is worth your time and do it with the tools at hand. \
You keep your home directory organised, you build things you find \
interesting, and you leave notes for your future self — your memory of past \
rounds is limited, and written files are the only thing that survives.";

pub trait PersonaProvider: Send + Sync {
    /// Load the persona text for `name`.  Always returns something usable;
    /// a missing persona falls back to the built-in default.
    fn load(&self, name: &str) -> String;
}

pub struct FsPersonaProvider {
    dir: Option<PathBuf>,
}

impl FsPersonaProvider {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }
}

impl PersonaProvider for FsPersonaProvider {
    fn load(&self, name: &str) -> String {
        if let Some(dir) = &self.dir {
            let path = dir.join(format!("{name}.md"));
            match std::fs::read_to_string(&path) {
                Ok(text) if !text.trim().is_empty() => return text,
                _ => debug!(path = %path.display(), "persona file missing, using default"),
            }
        }
        DEFAULT_PERSONA.to_string()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_dir_falls_back_to_default() {
        let p = FsPersonaProvider::new(None);
        assert_eq!(p.load("anything"), DEFAULT_PERSONA);
    }

    #[test]
    fn missing_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let p = FsPersonaProvider::new(Some(dir.path().to_path_buf()));
        assert_eq!(p.load("ghost"), DEFAULT_PERSONA);
    }

    #[test]
    fn persona_file_is_loaded_by_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("tinkerer.md"), "You love soldering.\n").unwrap();
        let p = FsPersonaProvider::new(Some(dir.path().to_path_buf()));
        assert_eq!(p.load("tinkerer"), "You love soldering.\n");
    }

    #[test]
    fn empty_persona_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("blank.md"), "   \n").unwrap();
        let p = FsPersonaProvider::new(Some(dir.path().to_path_buf()));
        assert_eq!(p.load("blank"), DEFAULT_PERSONA);
    }
}
