//! Package manager detection from lockfiles, and the commands each one
//! uses for install / dev / add.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    Bun,
    Pnpm,
    Npm,
}

impl PackageManager {
    /// Detect from the lockfiles present in a file snapshot.
    /// `bun.lock` → bun, `pnpm-lock.yaml` → pnpm, anything else → npm.
    pub fn detect<'a>(paths: impl IntoIterator<Item = &'a str>) -> Self {
        let mut detected = PackageManager::Npm;
        for path in paths {
            match path {
                "bun.lock" | "bun.lockb" => return PackageManager::Bun,
                "pnpm-lock.yaml" => detected = PackageManager::Pnpm,
                _ => {}
            }
        }
        detected
    }

    pub fn install_command(&self) -> &'static str {
        match self {
            PackageManager::Bun => "bun install",
            PackageManager::Pnpm => "pnpm install",
            PackageManager::Npm => "npm install",
        }
    }

    pub fn dev_command(&self) -> &'static str {
        match self {
            PackageManager::Bun => "bun run dev",
            PackageManager::Pnpm => "pnpm run dev",
            PackageManager::Npm => "npm run dev",
        }
    }

    pub fn add_command(&self, packages: &[String], dev: bool) -> String {
        let list = packages.join(" ");
        match (self, dev) {
            (PackageManager::Bun, false) => format!("bun add {list}"),
            (PackageManager::Bun, true) => format!("bun add -d {list}"),
            (PackageManager::Pnpm, false) => format!("pnpm add {list}"),
            (PackageManager::Pnpm, true) => format!("pnpm add -D {list}"),
            (PackageManager::Npm, false) => format!("npm install {list}"),
            (PackageManager::Npm, true) => format!("npm install --save-dev {list}"),
        }
    }
}

/// Parse the package specs out of an install-style command, so ad-hoc
/// `runCommand` installs still land in the dependency map.
/// Returns `(name, version)` pairs; a bare name maps to `"latest"`.
pub fn parse_install_targets(command: &str) -> Vec<(String, String)> {
    let tokens: Vec<&str> = command.split_whitespace().collect();
    let is_install = matches!(
        tokens.as_slice(),
        [pm, verb, ..] if matches!(*pm, "npm" | "pnpm" | "bun" | "yarn")
            && matches!(*verb, "install" | "i" | "add")
    );
    if !is_install {
        return Vec::new();
    }

    tokens[2..]
        .iter()
        .filter(|t| !t.starts_with('-'))
        .map(|spec| match spec.rfind('@') {
            // `@scope/name@1.2.3` — the split point must not be the leading @.
            Some(idx) if idx > 0 => (spec[..idx].to_string(), spec[idx + 1..].to_string()),
            _ => (spec.to_string(), "latest".to_string()),
        })
        .collect()
}
