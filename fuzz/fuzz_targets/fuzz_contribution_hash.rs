#![no_main]

use axiom_ceremony::{CeremonyId, ContributionHash};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };

    // Round-trip through the canonical lowercase form
    if let Ok(hash) = ContributionHash::from_hex(s) {
        let hex = hash.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(ContributionHash::from_hex(&hex).unwrap(), hash);
    }

    if let Ok(id) = CeremonyId::new(s) {
        assert_eq!(id.as_str(), s);
        assert_eq!(s.parse::<CeremonyId>().unwrap(), id);
    }
});
