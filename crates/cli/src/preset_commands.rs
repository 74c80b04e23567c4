use {
    parley_chat::DirPresetStore,
    parley_config::ParleyConfig,
    parley_service_traits::PresetStore,
};

pub fn list(config: &ParleyConfig) {
    let lines = preset_lines(&DirPresetStore::from_config(&config.presets));
    if lines.is_empty() {
        println!("No presets found (scan dir: {}).", config.presets.scan_dir);
        return;
    }
    for line in lines {
        println!("{line}");
    }
}

fn preset_lines(store: &DirPresetStore) -> Vec<String> {
    store
        .keywords()
        .into_iter()
        .map(|keyword| match store.path(&keyword) {
            Some(path) => format!("  {keyword:<16} {}", path.display()),
            None => format!("  {keyword}"),
        })
        .collect()
}
