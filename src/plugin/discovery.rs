//! Plugin discovery (§4.E step 1): scan plugin directories for
//! `config.yaml`, honoring `<data_root>/plugins/disabled.txt`.

use camino::{Utf8Path, Utf8PathBuf};

use crate::plugin::descriptor::PluginManifest;

/// Names listed in `disabled.txt`, one per line; `#`-prefixed lines and
/// blank lines are ignored.
pub fn read_disabled_list(plugins_dir: &Utf8Path) -> Vec<String> {
    let path = plugins_dir.join("disabled.txt");
    let Ok(contents) = std::fs::read_to_string(&path) else {
        return Vec::new();
    };

    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_owned)
        .collect()
}

/// A discovered, not-yet-loaded plugin: its manifest and the directory it
/// came from (= `package_path`).
pub struct Discovered {
    pub manifest: PluginManifest,
    pub package_path: Utf8PathBuf,
}

/// Scans `dirs` (conventionally the bundled plugin directory, then
/// `<data_root>/plugins`) for immediate subdirectories containing
/// `config.yaml`, skipping anything named in `disabled.txt` under any of
/// the scanned directories.
pub fn discover(dirs: &[Utf8PathBuf]) -> anyhow::Result<Vec<Discovered>> {
    let mut disabled = Vec::new();
    for dir in dirs {
        disabled.extend(read_disabled_list(dir));
    }

    let mut discovered = Vec::new();

    for dir in dirs {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => continue,
            Err(error) => return Err(anyhow::anyhow!(error).context(format!("reading plugin directory {dir}"))),
        };

        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }

            let package_path = Utf8PathBuf::from_path_buf(entry.path())
                .map_err(|path| anyhow::anyhow!("plugin path {path:?} is not valid UTF-8"))?;
            let manifest_path = package_path.join("config.yaml");

            let Ok(raw) = std::fs::read_to_string(&manifest_path) else {
                continue;
            };

            let manifest: PluginManifest = serde_yaml::from_str(&raw)
                .map_err(|error| anyhow::anyhow!(error).context(format!("parsing {manifest_path}")))?;

            if disabled.iter().any(|name| name == &manifest.name) {
                info!(plugin = %manifest.name, "plugin disabled, skipping discovery");
                continue;
            }

            discovered.push(Discovered { manifest, package_path });
        }
    }

    Ok(discovered)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Utf8Path, name: &str, contents: &str) {
        let plugin_dir = dir.join(name);
        std::fs::create_dir_all(&plugin_dir).unwrap();
        std::fs::write(plugin_dir.join("config.yaml"), contents).unwrap();
    }

    #[test]
    fn discovers_subdirectories_with_manifests() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        write(&root, "scheduler", "name: scheduler\ndependencies: [storage]\n");
        write(&root, "storage", "name: storage\n");
        std::fs::create_dir_all(root.join("not-a-plugin")).unwrap(); // no config.yaml

        let found = discover(&[root]).unwrap();
        let mut names: Vec<_> = found.iter().map(|d| d.manifest.name.clone()).collect();
        names.sort();
        assert_eq!(names, vec!["scheduler".to_owned(), "storage".to_owned()]);
    }

    #[test]
    fn disabled_list_excludes_named_plugins() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        write(&root, "scheduler", "name: scheduler\n");
        write(&root, "storage", "name: storage\n");
        std::fs::write(root.join("disabled.txt"), "# comment\nstorage\n").unwrap();

        let found = discover(&[root]).unwrap();
        let names: Vec<_> = found.iter().map(|d| d.manifest.name.clone()).collect();
        assert_eq!(names, vec!["scheduler".to_owned()]);
    }

    #[test]
    fn missing_directory_is_not_an_error() {
        let found = discover(&[Utf8PathBuf::from("/does/not/exist")]).unwrap();
        assert!(found.is_empty());
    }
}
