use anyhow::{Result, anyhow};
use std::{
    env,
    path::{Component, Path, PathBuf},
};

#[derive(Clone)]
pub struct Paths {
    pub home: PathBuf,
    pub config: PathBuf,
}

/// Directory holding websync's own files.
///
/// `$XDG_CONFIG_HOME/websync`, falling back to `$HOME/.config/websync`.
pub fn websync_home() -> Result<PathBuf> {
    let base = match env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        Some(xdg) => PathBuf::from(xdg),
        None => env::var_os("HOME")
            .filter(|v| !v.is_empty())
            .map(|h| PathBuf::from(h).join(".config"))
            .ok_or_else(|| anyhow!("neither XDG_CONFIG_HOME nor HOME is set"))?,
    };
    Ok(base.join("websync"))
}

pub fn paths() -> Result<Paths> {
    let home = websync_home()?;
    Ok(Paths {
        config: home.join("config.toml"),
        home,
    })
}

/// Replace a leading `~` component with `$HOME`.
///
/// Paths without a leading `~`, or any path when `HOME` is unset, are
/// returned unchanged.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let mut comps = path.components();
    match comps.next() {
        Some(Component::Normal(first)) if first == "~" => match env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(comps.as_path()),
            None => path.to_path_buf(),
        },
        _ => path.to_path_buf(),
    }
}
