#![no_main]

use arbitrary::Arbitrary;
use axiom_ceremony::{
    Ceremony, CeremonyId, ContentHasher, ContributionHash, DigestVerifier, HashAlgorithm,
    Participant, ParticipantId, Sha256Hasher,
};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Submission {
    participant: u8,
    payload: Vec<u8>,
    honest: bool,
}

#[derive(Debug, Arbitrary)]
struct Input {
    roster: u8,
    submissions: Vec<Submission>,
    abort_after: Option<u8>,
}

fuzz_target!(|input: Input| {
    let size = (input.roster % 8) as usize + 1;
    let participants = (0..size)
        .map(|i| Participant::new(format!("p{}", i), format!("P{}", i), "fuzz"))
        .collect();
    let Ok(mut ceremony) =
        Ceremony::new(CeremonyId::new("fuzz").unwrap(), participants, HashAlgorithm::Sha256)
    else {
        return;
    };
    if ceremony.start().is_err() {
        return;
    }

    let verifier = DigestVerifier::new(Sha256Hasher);
    for (i, submission) in input.submissions.iter().enumerate() {
        if input.abort_after.map(|n| n as usize) == Some(i) {
            let _ = ceremony.abort("fuzz abort");
        }

        let id = ParticipantId::new(format!("p{}", submission.participant % 10));
        let mut claimed = *Sha256Hasher.compute_hash(&submission.payload).as_bytes();
        if !submission.honest {
            claimed[31] ^= 1;
        }

        let before = ceremony.current_turn();
        let accepted = ceremony
            .submit_contribution(
                &id,
                &submission.payload,
                &ContributionHash::new(claimed),
                &verifier,
            )
            .is_ok();

        assert_eq!(ceremony.history().len(), ceremony.current_turn());
        assert_eq!(ceremony.current_turn(), before + usize::from(accepted));
        assert!(ceremony.check_invariants().is_ok());
    }
});
