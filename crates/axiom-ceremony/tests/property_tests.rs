//! Property-based tests for the ceremony state machine using proptest
//!
//! These tests drive ceremonies with arbitrary submission sequences and check
//! the ledger/turn invariants after every step.

use axiom_ceremony::{
    Ceremony, CeremonyError, CeremonyId, ContentHasher, ContributionHash, DigestVerifier,
    HashAlgorithm, Participant, ParticipantId, Phase, Sha256Hasher,
};
use proptest::prelude::*;

// ============================================
// Strategies
// ============================================

/// One attempted submission: who submits, what payload, and whether the
/// claimed hash is honest
#[derive(Debug, Clone)]
struct Attempt {
    submitter: usize,
    payload: Vec<u8>,
    honest_hash: bool,
}

fn arb_attempt(roster_size: usize) -> impl Strategy<Value = Attempt> {
    (
        0..roster_size + 1,
        prop::collection::vec(any::<u8>(), 1..64),
        prop::bool::weighted(0.7),
    )
        .prop_map(|(submitter, payload, honest_hash)| Attempt {
            submitter,
            payload,
            honest_hash,
        })
}

fn arb_scenario() -> impl Strategy<Value = (usize, Vec<Attempt>)> {
    (2usize..7).prop_flat_map(|n| (Just(n), prop::collection::vec(arb_attempt(n), 0..40)))
}

fn roster(n: usize) -> Vec<Participant> {
    (0..n)
        .map(|i| Participant::new(format!("p{}", i), format!("Participant {}", i), "contact"))
        .collect()
}

fn started(n: usize) -> Ceremony {
    let mut ceremony = Ceremony::new(
        CeremonyId::new("prop").unwrap(),
        roster(n),
        HashAlgorithm::Sha256,
    )
    .unwrap();
    ceremony.start().unwrap();
    ceremony
}

fn submitter_id(index: usize) -> ParticipantId {
    // index == roster size names someone outside the roster
    ParticipantId::new(format!("p{}", index))
}

fn claim_for(attempt: &Attempt) -> ContributionHash {
    let honest = Sha256Hasher.compute_hash(&attempt.payload);
    if attempt.honest_hash {
        honest
    } else {
        let mut bytes = *honest.as_bytes();
        bytes[0] ^= 0xff;
        ContributionHash::new(bytes)
    }
}

// ============================================
// Properties
// ============================================

proptest! {
    #[test]
    fn ledger_length_tracks_turn((n, attempts) in arb_scenario()) {
        let mut ceremony = started(n);
        let verifier = DigestVerifier::new(Sha256Hasher);

        for attempt in &attempts {
            let _ = ceremony.submit_contribution(
                &submitter_id(attempt.submitter),
                &attempt.payload,
                &claim_for(attempt),
                &verifier,
            );
            prop_assert_eq!(ceremony.history().len(), ceremony.current_turn());
            prop_assert!(ceremony.check_invariants().is_ok());
        }
    }

    #[test]
    fn rejected_submissions_never_mutate((n, attempts) in arb_scenario()) {
        let mut ceremony = started(n);
        let verifier = DigestVerifier::new(Sha256Hasher);

        for attempt in &attempts {
            let before_turn = ceremony.current_turn();
            let before_ledger = ceremony.history();

            let result = ceremony.submit_contribution(
                &submitter_id(attempt.submitter),
                &attempt.payload,
                &claim_for(attempt),
                &verifier,
            );

            match result {
                Ok(outcome) => {
                    prop_assert_eq!(ceremony.current_turn(), before_turn + 1);
                    prop_assert_eq!(&outcome.accepted().participant_id, &submitter_id(before_turn));
                }
                Err(CeremonyError::OutOfTurn { .. }) | Err(CeremonyError::Verification { .. }) => {
                    prop_assert_eq!(ceremony.current_turn(), before_turn);
                    prop_assert_eq!(ceremony.history(), before_ledger);
                }
                Err(CeremonyError::InvalidTransition { .. }) => {
                    prop_assert_eq!(ceremony.phase(), &Phase::Completed);
                }
                Err(other) => prop_assert!(false, "unexpected error {:?}", other),
            }
        }
    }

    #[test]
    fn dishonest_claims_never_advance((n, attempts) in arb_scenario()) {
        let mut ceremony = started(n);
        let verifier = DigestVerifier::new(Sha256Hasher);

        for attempt in attempts.iter().filter(|a| !a.honest_hash) {
            let current = submitter_id(ceremony.current_turn());
            let before = ceremony.current_turn();
            let result = ceremony.submit_contribution(
                &current,
                &attempt.payload,
                &claim_for(attempt),
                &verifier,
            );
            let is_verification_error = matches!(result, Err(CeremonyError::Verification { .. }));
            prop_assert!(is_verification_error);
            prop_assert_eq!(ceremony.current_turn(), before);
        }
    }

    #[test]
    fn honest_run_completes_and_stays_complete(n in 2usize..10) {
        let mut ceremony = started(n);
        let verifier = DigestVerifier::new(Sha256Hasher);

        for turn in 0..n {
            let payload = format!("contribution-{}", turn).into_bytes();
            let claim = Sha256Hasher.compute_hash(&payload);
            let outcome = ceremony
                .submit_contribution(&submitter_id(turn), &payload, &claim, &verifier)
                .unwrap();
            prop_assert_eq!(outcome.is_complete(), turn == n - 1);
        }

        prop_assert_eq!(ceremony.phase(), &Phase::Completed);
        for _ in 0..3 {
            prop_assert_eq!(&ceremony.status().phase, &Phase::Completed);
            prop_assert_eq!(ceremony.status().current_turn, n);
        }
        prop_assert!(ceremony.final_hash().is_some());
    }

    #[test]
    fn contribution_hash_hex_roundtrip(bytes in any::<[u8; 32]>()) {
        let hash = ContributionHash::new(bytes);
        prop_assert_eq!(ContributionHash::from_hex(&hash.to_hex()).unwrap(), hash);
        let json = serde_json::to_string(&hash).unwrap();
        prop_assert_eq!(serde_json::from_str::<ContributionHash>(&json).unwrap(), hash);
    }
}
