#![no_main]

use axiom_ceremony::Ceremony;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(ceremony) = serde_json::from_slice::<Ceremony>(data) else {
        return;
    };

    // Reads must not panic on any snapshot that passes validation
    if ceremony.check_invariants().is_ok() {
        let status = ceremony.status();
        assert_eq!(status.current_turn, ceremony.history().len());
        let _ = status.progress();
    }
});
