use crate::classifier::DenyReason;
use std::path::{Component, Path, PathBuf};

/// Denies paths that resolve to, or beneath, a banned prefix.
///
/// Each candidate is checked twice: once in its lexically normalized form and
/// once after symlinks on its longest existing prefix are resolved, so neither
/// `..` segments nor a symlink can route around a ban.
#[derive(Debug, Clone)]
pub struct PathGuard {
    banned: Vec<BannedPrefix>,
}

#[derive(Debug, Clone)]
struct BannedPrefix {
    display: String,
    lexical: PathBuf,
    resolved: Option<PathBuf>,
}

impl PathGuard {
    pub fn new(banned_paths: &[String]) -> Self {
        let banned = banned_paths
            .iter()
            .filter(|raw| !raw.trim().is_empty())
            .map(|raw| {
                let lexical = normalize(&expand_home(raw.trim()));
                let resolved = resolve(&lexical);
                BannedPrefix {
                    display: raw.trim().to_string(),
                    lexical,
                    resolved,
                }
            })
            .collect();

        Self { banned }
    }

    /// Returns the resolved path when it is allowed.
    pub fn check(&self, raw: &str) -> Result<PathBuf, DenyReason> {
        let unresolvable = || DenyReason::UnresolvablePath {
            path: raw.to_string(),
        };

        if raw.trim().is_empty() || raw.contains('\0') {
            return Err(unresolvable());
        }

        let absolute = absolutize(&expand_home(raw)).ok_or_else(unresolvable)?;
        let lexical = normalize(&absolute);
        let resolved = resolve(&lexical).ok_or_else(unresolvable)?;

        for prefix in &self.banned {
            let hit = [&lexical, &resolved].iter().any(|candidate| {
                candidate.starts_with(&prefix.lexical)
                    || prefix
                        .resolved
                        .as_ref()
                        .is_some_and(|banned| candidate.starts_with(banned))
            });

            if hit {
                return Err(DenyReason::BannedPath {
                    path: raw.to_string(),
                    prefix: prefix.display.clone(),
                });
            }
        }

        Ok(resolved)
    }

    pub fn banned_prefixes(&self) -> impl Iterator<Item = &str> {
        self.banned.iter().map(|prefix| prefix.display.as_str())
    }
}

/// Expands a leading `~` to `$HOME`. Other forms are returned unchanged.
pub fn expand_home(raw: &str) -> PathBuf {
    let home = std::env::var_os("HOME").map(PathBuf::from);

    match (raw, home) {
        ("~", Some(home)) => home,
        (path, Some(home)) if path.starts_with("~/") => home.join(&path[2..]),
        (path, _) => PathBuf::from(path),
    }
}

fn absolutize(path: &Path) -> Option<PathBuf> {
    if path.is_absolute() {
        Some(path.to_path_buf())
    } else {
        std::env::current_dir().ok().map(|cwd| cwd.join(path))
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

// Canonicalizes the longest existing ancestor and re-attaches the remainder.
fn resolve(path: &Path) -> Option<PathBuf> {
    for ancestor in path.ancestors() {
        if let Ok(canonical) = ancestor.canonicalize() {
            let rest = path.strip_prefix(ancestor).ok()?;
            return Some(normalize(&canonical.join(rest)));
        }
    }
    None
}
