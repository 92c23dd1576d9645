#![no_main]

use concord_core::config::EngineConfig;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = EngineConfig::from_yaml_str(s);
        let _ = serde_yaml::from_str::<concord_core::policy::StaticPolicy>(s);
    }
});
