use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ark_ec::AffineRepr;
use ark_ff::{One, Zero};
use async_trait::async_trait;
use serial_test::serial;

use crate::backend::accumulator::challenge_polynomial_commitment;
use crate::backend::transparent::TransparentBackend;
use crate::backend::{BackendProof, ProofSystem, VerifierIndex};
use crate::compiler::wrap::{self, WrapShape, WrapWitness};
use crate::compiler::MAX_PROOFS_VERIFIED;
use crate::curves::{CycleCurve, WrapAffine};
use crate::keys::{KeyKind, KeyStore, MemoryStore};
use crate::proof::PreviousProof;
use crate::r1cs::builder::Boolean;
use crate::r1cs::constraint_system::LookupTable;
use crate::verifier::{
    accumulator_digest, compiled_key_digest, statement_digest, wrap_public_input, StepBackend,
};
use crate::*;

fn field(x: u64) -> StepField {
    StepField::from(x)
}

fn memory_cache() -> (Arc<MemoryStore>, KeyCache) {
    let store = Arc::new(MemoryStore::new());
    let cache = KeyCache::new(vec![store.clone() as Arc<dyn KeyStore>]);
    (store, cache)
}

/// `n` proves that `n` steps were taken from zero.
fn counter_rules(tag: &Tag) -> Vec<InductiveRule> {
    let base = InductiveRule::new("base", vec![], |ctx, input| {
        let zero = ctx.constant(StepField::zero());
        ctx.constrain_eq(&input[0], &zero);
        Ok(RuleOutput::new(vec![]))
    });
    let step = InductiveRule::new("step", vec![Predecessor::from(tag)], |ctx, input| {
        let previous = ctx.previous_statement(0)?;
        let one = ctx.constant(StepField::one());
        let next = ctx.add(&previous.input[0], &one);
        ctx.constrain_eq(&input[0], &next);
        Ok(RuleOutput::new(vec![]).with_previous(previous, Boolean::constant(true)))
    });
    vec![base, step]
}

async fn counter(cache: KeyCache) -> Compiled {
    let tag = Tag::create("counter", StatementShape::new(1, 0), 1, 2);
    let rules = counter_rules(&tag);
    compile(&tag, CompileConfig::new(cache), rules).await.unwrap()
}

/// Width-0 system whose single rule squares its input.
async fn square(name: &str, cache: KeyCache) -> Compiled {
    let tag = Tag::create(name, StatementShape::new(1, 1), 0, 1);
    let rule = InductiveRule::new("square", vec![], |ctx, input| {
        let out = ctx.square(&input[0]);
        Ok(RuleOutput::new(vec![out]))
    });
    compile(&tag, CompileConfig::new(cache), vec![rule]).await.unwrap()
}

async fn prove_counter(compiled: &Compiled, steps: u64) -> Vec<(Statement, Proof)> {
    let base = compiled.prover("base").unwrap();
    let step = compiled.prover("step").unwrap();
    let first = base.prove(ProveRequest::new(vec![field(0)])).await.unwrap();
    let mut proofs = vec![(first.statement, first.proof)];
    for n in 1..=steps {
        let (statement, proof) = proofs.last().cloned().unwrap();
        let next = step
            .prove(ProveRequest::new(vec![field(n)]).with_previous(statement, proof))
            .await
            .unwrap();
        proofs.push((next.statement, next.proof));
    }
    proofs
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn counter_chain_is_complete() {
    let compiled = counter(KeyCache::default()).await;
    let proofs = prove_counter(&compiled, 2).await;

    assert_eq!(proofs[2].0, Statement::new(vec![field(2)], vec![]));
    for pair in proofs.iter() {
        assert!(compiled.verifier.verify(vec![pair.clone()]).await.unwrap());
    }
    assert!(compiled.verifier.verify(proofs.clone()).await.unwrap());
    assert!(compiled.verifier.verify(vec![]).await.unwrap());
    assert!(compiled
        .verifier
        .verify_each(&proofs)
        .iter()
        .all(|r| r.is_ok()));
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn step_rule_rejects_a_wrong_successor() {
    let compiled = counter(KeyCache::default()).await;
    let proofs = prove_counter(&compiled, 0).await;
    let (statement, proof) = proofs[0].clone();
    let err = compiled
        .prover("step")
        .unwrap()
        .prove(ProveRequest::new(vec![field(2)]).with_previous(statement, proof))
        .await
        .unwrap_err();
    assert!(matches!(err, PicklesError::Unsatisfied { .. }));
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn single_byte_mutations_are_rejected() {
    let compiled = counter(KeyCache::default()).await;
    let proofs = prove_counter(&compiled, 1).await;
    let (statement, proof) = proofs[1].clone();
    let bytes = proof.to_bytes().unwrap();

    // Proofs carry their predecessors, so sample positions across the encoding
    let stride = bytes.len() / 160 + 1;
    for i in (0..64.min(bytes.len())).chain((64..bytes.len()).step_by(stride)) {
        let mut mutated = bytes.clone();
        mutated[i] ^= 1;
        let Ok(mutated) = Proof::from_bytes(&mutated) else {
            continue;
        };
        assert!(
            !compiled
                .verifier
                .verify_blocking(&[(statement.clone(), mutated)])
                .unwrap(),
            "mutation at byte {i} was accepted"
        );
    }

    let wrong_statement = Statement::new(vec![field(7)], vec![]);
    assert!(!compiled
        .verifier
        .verify_blocking(&[(wrong_statement, proof.clone())])
        .unwrap());
    // One bad proof spoils the batch
    let mut batch = proofs.clone();
    batch[0].0 = Statement::new(vec![field(1)], vec![]);
    assert!(!compiled.verifier.verify_blocking(&batch).unwrap());
    let each = compiled.verifier.verify_each(&batch);
    assert!(each[0].is_err());
    assert!(each[1].is_ok());
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn keys_are_reproducible_across_caches() {
    let (store, first_cache) = memory_cache();
    let first = counter(first_cache).await;
    assert_eq!(first.cache_handle.dirty(), Dirty::LocallyGenerated);
    assert_eq!(store.len(), 3);

    let second_cache = KeyCache::new(vec![store.clone() as Arc<dyn KeyStore>]);
    let second = counter(second_cache).await;
    assert_eq!(second.cache_handle.dirty(), Dirty::CacheHit);
    assert_eq!(first.cache_handle.key_ids(), second.cache_handle.key_ids());
    assert_eq!(first.verifier.key(), second.verifier.key());
    assert_eq!(
        first.cache_handle.key_ids().last(),
        Some(&first.verifier.key().id())
    );

    // Proofs of one compilation verify under the other
    let proofs = prove_counter(&first, 1).await;
    assert!(second.verifier.verify(proofs).await.unwrap());

    // A cache that only knows the step keys regenerates the wrap key
    let partial = Arc::new(MemoryStore::new());
    for id in first.cache_handle.key_ids() {
        if id.kind() == KeyKind::Step {
            let bytes = store.get(&id).await.unwrap().unwrap();
            partial.insert_raw(&id, bytes);
        }
    }
    let third = counter(KeyCache::new(vec![partial as Arc<dyn KeyStore>])).await;
    assert_eq!(third.cache_handle.dirty(), Dirty::GeneratedSomething);
}

const KEY_IDS_CHILD: &str = "PICKLES_PRINT_COUNTER_KEY_IDS";

/// Runs inside the child process spawned by
/// `keys_are_reproducible_across_processes`.
#[tokio::test(flavor = "multi_thread")]
#[ignore = "spawned by keys_are_reproducible_across_processes"]
async fn print_counter_key_ids() {
    if std::env::var_os(KEY_IDS_CHILD).is_none() {
        return;
    }
    let compiled = counter(KeyCache::default()).await;
    for id in compiled.cache_handle.key_ids() {
        println!("key-id {id}");
    }
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn keys_are_reproducible_across_processes() {
    // Move this process's tag counter away from a fresh one
    for i in 0..5 {
        let _ = Tag::create(format!("unrelated-{i}"), StatementShape::new(2, 1), 1, 1);
    }
    let compiled = counter(KeyCache::default()).await;

    let output = std::process::Command::new(std::env::current_exe().unwrap())
        .args([
            "tests::print_counter_key_ids",
            "--exact",
            "--ignored",
            "--nocapture",
            "--test-threads=1",
            "--quiet",
        ])
        .env(KEY_IDS_CHILD, "1")
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8(output.stdout).unwrap();
    let child: Vec<KeyId> = stdout
        .lines()
        .filter_map(|line| line.strip_prefix("key-id "))
        .map(|id| id.parse().unwrap())
        .collect();
    assert_eq!(child.len(), 3);
    assert_eq!(child, compiled.cache_handle.key_ids());
    for (ours, theirs) in compiled.cache_handle.key_ids().iter().zip(child.iter()) {
        assert_eq!(ours.digest(), theirs.digest());
        assert_eq!(ours.label(), theirs.label());
    }
}

struct CountingStore {
    inner: MemoryStore,
    puts: AtomicUsize,
}

#[async_trait]
impl KeyStore for CountingStore {
    fn name(&self) -> &str {
        "counting"
    }

    async fn get(&self, id: &KeyId) -> Result<Option<Vec<u8>>, PicklesError> {
        self.inner.get(id).await
    }

    async fn put(&self, id: &KeyId, bytes: &[u8]) -> Result<(), PicklesError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put(id, bytes).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn concurrent_compiles_generate_each_key_once() {
    let store = Arc::new(CountingStore {
        inner: MemoryStore::new(),
        puts: AtomicUsize::new(0),
    });
    let cache = KeyCache::new(vec![store.clone() as Arc<dyn KeyStore>]);

    let compiles = (0..4).map(|_| {
        let cache = cache.clone();
        tokio::spawn(async move { counter(cache).await })
    });
    let compiled: Vec<Compiled> = futures_util::future::join_all(compiles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    assert_eq!(store.puts.load(Ordering::SeqCst), 3);
    for c in compiled.iter() {
        assert_eq!(c.cache_handle.key_ids(), compiled[0].cache_handle.key_ids());
    }
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn encodings_round_trip() {
    let compiled = counter(KeyCache::default()).await;
    let (statement, proof) = prove_counter(&compiled, 1).await.pop().unwrap();

    let decoded = Proof::from_bytes(&proof.to_bytes().unwrap()).unwrap();
    assert_eq!(decoded, proof);
    assert_eq!(Proof::from_hex(&proof.to_hex().unwrap()).unwrap(), proof);
    assert_eq!(Proof::from_base64(&proof.to_base64().unwrap()).unwrap(), proof);
    assert_eq!(
        Statement::from_bytes(&statement.to_bytes().unwrap()).unwrap(),
        statement
    );

    let key = compiled.verifier.key();
    let decoded_key = VerificationKey::from_bytes(&key.to_bytes().unwrap()).unwrap();
    assert_eq!(&decoded_key, key);
    assert_eq!(decoded_key.id(), key.id());
    assert!(Verifier::new(decoded_key)
        .verify_blocking(&[(statement, decoded)])
        .unwrap());

    let side_loaded = SideLoadedKey::of_compiled(&compiled.tag).unwrap();
    let text = side_loaded.to_base64().unwrap();
    assert_eq!(SideLoadedKey::from_base64(&text).unwrap(), side_loaded);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("counter.proof");
    proof.save_to_file(&path).unwrap();
    assert_eq!(Proof::from_file(&path).unwrap(), proof);
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn side_loaded_verification_matches_compiled() {
    let compiled = counter(KeyCache::default()).await;
    let proofs = prove_counter(&compiled, 1).await;
    let key = SideLoadedKey::of_compiled(&compiled.tag).unwrap();

    let batch: Vec<_> = proofs
        .iter()
        .map(|(s, p)| (key.clone(), s.clone(), p.clone()))
        .collect();
    assert!(side_loaded::verify(batch.clone()).await.unwrap());

    let mut tampered = batch.clone();
    tampered[1].1 = Statement::new(vec![field(5)], vec![]);
    assert_eq!(
        side_loaded::verify(tampered).await.unwrap(),
        compiled
            .verifier
            .verify(vec![(Statement::new(vec![field(5)], vec![]), proofs[1].1.clone())])
            .await
            .unwrap()
    );

    // Keys of another system do not verify these proofs
    let other = square("square-side", KeyCache::default()).await;
    let mut foreign = SideLoadedKey::of_compiled(&other.tag).unwrap();
    foreign.statement = key.statement;
    assert!(!side_loaded::verify(vec![(foreign, proofs[0].0.clone(), proofs[0].1.clone())])
        .await
        .unwrap());

    let mut oversized = key.clone();
    oversized.branches = vec![key.branches[0]; side_loaded::MAX_SIDE_LOADED_BRANCHES + 1];
    assert!(!side_loaded::verify_blocking(&[(oversized, proofs[0].0.clone(), proofs[0].1.clone())])
        .unwrap());
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn side_loaded_predecessor_is_bound_when_proving() {
    let counter = counter(KeyCache::default()).await;
    let proofs = prove_counter(&counter, 1).await;

    let slot = SideLoadedTag::create("any-counter", StatementShape::new(1, 0), 1);
    let tag = Tag::create("wrapper", StatementShape::new(1, 0), 1, 1);
    let rule_slot = slot.clone();
    let rule = InductiveRule::new("wrap-any", vec![Predecessor::from(&slot)], move |ctx, input| {
        let _key = ctx.side_loaded_key(&rule_slot)?;
        let previous = ctx.previous_statement(0)?;
        ctx.constrain_eq(&input[0], &previous.input[0]);
        Ok(RuleOutput::new(vec![]).with_previous(previous, Boolean::constant(true)))
    });
    let wrapper = compile(&tag, CompileConfig::default(), vec![rule])
        .await
        .unwrap();
    let prover = &wrapper.provers[0];

    let key = SideLoadedKey::of_compiled(&counter.tag).unwrap();
    let (statement, proof) = proofs[1].clone();
    let request = ProveRequest::new(vec![field(1)])
        .with_previous(statement.clone(), proof.clone())
        .with_side_loaded_key(&slot, key.clone());
    let out = prover.prove(request).await.unwrap();
    assert!(wrapper.verifier.verify(vec![(out.statement, out.proof)]).await.unwrap());

    // No key registered for the slot
    let missing = ProveRequest::new(vec![field(1)]).with_previous(statement.clone(), proof.clone());
    assert!(matches!(
        prover.prove(missing).await,
        Err(PicklesError::SideLoadedBinding(_))
    ));

    // A key for an unrelated tag is never bound
    let stray = SideLoadedTag::create("stray", StatementShape::new(1, 0), 1);
    let extra = ProveRequest::new(vec![field(1)])
        .with_previous(statement.clone(), proof.clone())
        .with_side_loaded_key(&slot, key.clone())
        .with_side_loaded_key(&stray, key.clone());
    assert!(matches!(
        prover.prove(extra).await,
        Err(PicklesError::SideLoadedBinding(_))
    ));

    // A key outside the slot's bounds
    let narrow = SideLoadedTag::create("narrow", StatementShape::new(1, 0), 0);
    assert!(matches!(
        narrow.admits(&key),
        Err(PicklesError::SideLoadedBinding(_))
    ));
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn base_case_only_verifies_under_its_own_key() {
    let a = square("square-a", KeyCache::default()).await;
    let tag = Tag::create("cube-b", StatementShape::new(1, 1), 0, 1);
    let cube = InductiveRule::new("cube", vec![], |ctx, input| {
        let sq = ctx.square(&input[0]);
        let out = ctx.mul(&sq, &input[0]);
        Ok(RuleOutput::new(vec![out]))
    });
    let b = compile(&tag, CompileConfig::default(), vec![cube])
        .await
        .unwrap();

    let out = a.provers[0]
        .prove(ProveRequest::new(vec![field(3)]))
        .await
        .unwrap();
    assert_eq!(out.statement.output, vec![field(9)]);
    assert_eq!(out.proof.max_proofs_verified, 0);
    assert!(out.proof.wrap_proof.prev_challenges.is_empty());

    let pair = (out.statement, out.proof);
    assert!(a.verifier.verify(vec![pair.clone()]).await.unwrap());
    assert!(!b.verifier.verify(vec![pair.clone()]).await.unwrap());

    // A width-0 proof does not fit a width-1 key
    let counter = counter(KeyCache::default()).await;
    let reshaped = (Statement::new(vec![field(3)], vec![]), pair.1);
    assert!(!counter.verifier.verify(vec![reshaped]).await.unwrap());
}

/// Recommits a backend proof after its public input or witness changed, the
/// way an honest prover would have.
fn recommit<P: CycleCurve>(
    index: &VerifierIndex<P>,
    public: &[P::ScalarField],
    proof: &mut BackendProof<P>,
) {
    let assignment: Vec<_> = public.iter().chain(proof.witness.iter()).copied().collect();
    proof.witness_commitment = P::srs().commit(&assignment).unwrap();
    let oracles = TransparentBackend::<P>::oracles(index, public, proof).unwrap();
    proof.challenge_polynomial_commitment =
        challenge_polynomial_commitment::<P>(&oracles.bulletproof_challenges).unwrap();
}

/// Re-targets a width-0, single branch proof at `statement`. Everything the
/// verifier recomputes is made consistent; only the step witness is kept.
fn retarget(key: &VerificationKey, proof: &Proof, statement: &Statement) -> Proof {
    let mut forged = proof.clone();
    let s = statement_digest(statement);
    forged.step_public_input = vec![s];
    let step_index = &key.step_indices()[0];
    recommit(step_index, &forged.step_public_input, &mut forged.step_proof);

    let oracles =
        StepBackend::oracles(step_index, &forged.step_public_input, &forged.step_proof).unwrap();
    let state = &mut forged.proof_state;
    state.sponge_digest_before_evaluations = oracles.sponge_digest;
    state.deferred_values.zeta = oracles.zeta;
    state.deferred_values.bulletproof_challenges = oracles.bulletproof_challenges;
    state.challenge_polynomial_commitment = forged.step_proof.challenge_polynomial_commitment;

    let public = wrap_public_input(key.max_step_domain_log2(), s, &forged.proof_state);
    let shape = WrapShape {
        branches: key.branches().to_vec(),
        step_digests: key.step_digests(),
        max_step_domain_log2: key.max_step_domain_log2(),
    };
    let witness = WrapWitness {
        branch: 0,
        public: &public,
        step_statement_digest: s,
    };
    let (_, witness) = wrap::synthesize(&shape, Some(&witness)).unwrap();
    forged.wrap_proof.witness = witness.unwrap().aux;
    recommit(key.wrap_index(), &public, &mut forged.wrap_proof);
    forged
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn false_statements_are_rejected() {
    let compiled = square("square-forged", KeyCache::default()).await;
    let key = compiled.verifier.key();
    let honest = compiled.provers[0]
        .prove(ProveRequest::new(vec![field(3)]))
        .await
        .unwrap();

    // Retargeting at the true statement reproduces a valid proof
    let same = retarget(key, &honest.proof, &honest.statement);
    assert_eq!(same, honest.proof);
    assert!(compiled
        .verifier
        .verify(vec![(honest.statement.clone(), same)])
        .await
        .unwrap());

    // 3^2 = 10 with every commitment and transcript value recomputed
    let false_statement = Statement::new(vec![field(3)], vec![field(10)]);
    let forged = retarget(key, &honest.proof, &false_statement);
    assert_ne!(forged.proof_state, honest.proof.proof_state);
    assert!(!compiled
        .verifier
        .verify(vec![(false_statement.clone(), forged.clone())])
        .await
        .unwrap());
    let each = compiled.verifier.verify_each(&[(false_statement, forged)]);
    assert!(matches!(each[0], Err(PicklesError::VerificationFailure(_))));

    // The same forgery nested as a predecessor does not help the next prover
    let outer = square_of_square(&compiled.tag).await;
    let nested = retarget(key, &honest.proof, &Statement::new(vec![field(3)], vec![field(10)]));
    let err = outer.provers[0]
        .prove(
            ProveRequest::new(vec![field(3)])
                .with_previous(Statement::new(vec![field(3)], vec![field(10)]), nested),
        )
        .await
        .unwrap_err();
    assert!(err.is_rejection(), "{err}");
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn skipping_a_required_predecessor_is_rejected() {
    let compiled = counter(KeyCache::default()).await;
    let proofs = prove_counter(&compiled, 1).await;
    let (statement, proof) = proofs[1].clone();
    let inner = &proofs[0].1;

    // Claim the step rule's predecessor was optional while keeping its digests
    let mut skipped = proof.clone();
    skipped.previous[0] = PreviousProof::Skipped {
        statement: proofs[0].0.clone(),
        accumulator_digest: accumulator_digest(inner).unwrap(),
        key_digest: compiled_key_digest(compiled.verifier.key().wrap_index()),
    };
    assert!(!compiled
        .verifier
        .verify(vec![(statement.clone(), skipped)])
        .await
        .unwrap());

    // A different nested proof of the same predecessor statement
    let mut swapped = proof.clone();
    if let PreviousProof::Verified { proof: nested, .. } = &mut swapped.previous[0] {
        nested.wrap_proof.challenge_polynomial_commitment = WrapAffine::generator();
    }
    assert!(!compiled
        .verifier
        .verify(vec![(statement.clone(), swapped)])
        .await
        .unwrap());

    // Dropping the evidence entirely
    let mut dropped = proof;
    dropped.previous.clear();
    assert!(!compiled.verifier.verify(vec![(statement, dropped)]).await.unwrap());
}

/// Width-1 system wrapping one `square` proof.
async fn square_of_square(inner: &Tag) -> Compiled {
    let tag = Tag::create("fourth-power", StatementShape::new(1, 1), 1, 1);
    let rule = InductiveRule::new("square-again", vec![Predecessor::from(inner)], |ctx, input| {
        let previous = ctx.previous_statement(0)?;
        ctx.constrain_eq(&previous.input[0], &input[0]);
        let out = ctx.square(&previous.output[0]);
        Ok(RuleOutput::new(vec![out]).with_previous(previous, Boolean::constant(true)))
    });
    compile(&tag, CompileConfig::default(), vec![rule])
        .await
        .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn corrupted_inner_proof_fails_outer_prover() {
    let inner = square("square-inner", KeyCache::default()).await;
    let outer = square_of_square(&inner.tag).await;

    let first = inner.provers[0]
        .prove(ProveRequest::new(vec![field(3)]))
        .await
        .unwrap();
    let second = outer.provers[0]
        .prove(
            ProveRequest::new(vec![field(3)])
                .with_previous(first.statement.clone(), first.proof.clone()),
        )
        .await
        .unwrap();
    assert_eq!(second.statement.output, vec![field(81)]);
    assert!(outer
        .verifier
        .verify(vec![(second.statement, second.proof)])
        .await
        .unwrap());

    // Deferred values no longer match the sponge digest
    let mut bad_zeta = first.proof.clone();
    bad_zeta.proof_state.deferred_values.zeta += StepField::one();
    let err = outer.provers[0]
        .prove(ProveRequest::new(vec![field(3)]).with_previous(first.statement.clone(), bad_zeta))
        .await
        .unwrap_err();
    assert!(err.is_rejection(), "{err}");

    // Passes partial verification, fails the deferred accumulator check
    let mut bad_sg = first.proof.clone();
    bad_sg.wrap_proof.challenge_polynomial_commitment = WrapAffine::generator();
    let err = outer.provers[0]
        .prove(ProveRequest::new(vec![field(3)]).with_previous(first.statement.clone(), bad_sg))
        .await
        .unwrap_err();
    assert!(matches!(err, PicklesError::VerificationFailure(_)));
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn heterogeneous_predecessor_widths() {
    let counter = counter(KeyCache::default()).await;
    let squares = square("square-mixed", KeyCache::default()).await;
    let tag = Tag::create("mixed", StatementShape::new(0, 1), 2, 1);
    let rule = InductiveRule::new(
        "sum",
        vec![Predecessor::from(&counter.tag), Predecessor::from(&squares.tag)],
        |ctx, _| {
            let steps = ctx.previous_statement(0)?;
            let squared = ctx.previous_statement(1)?;
            let out = ctx.add(&steps.input[0], &squared.output[0]);
            Ok(RuleOutput::new(vec![out])
                .with_previous(steps, Boolean::constant(true))
                .with_previous(squared, Boolean::constant(true)))
        },
    );
    let mixed = compile(&tag, CompileConfig::default(), vec![rule])
        .await
        .unwrap();

    let (steps, steps_proof) = prove_counter(&counter, 1).await.pop().unwrap();
    let sq = squares.provers[0]
        .prove(ProveRequest::new(vec![field(4)]))
        .await
        .unwrap();
    let out = mixed.provers[0]
        .prove(
            ProveRequest::new(vec![])
                .with_previous(steps, steps_proof)
                .with_previous(sq.statement, sq.proof),
        )
        .await
        .unwrap();
    assert_eq!(out.statement.output, vec![field(17)]);
    assert_eq!(out.proof.wrap_proof.prev_challenges.len(), 2);
    assert_eq!(
        out.proof.proof_state.deferred_values.branch_data.proofs_verified,
        2
    );
    assert!(mixed
        .verifier
        .verify(vec![(out.statement, out.proof)])
        .await
        .unwrap());
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn dummy_predecessor_need_not_verify() {
    let counter = counter(KeyCache::default()).await;
    let tag = Tag::create("maybe", StatementShape::new(0, 1), 1, 1);
    let rule = InductiveRule::new("maybe-step", vec![Predecessor::from(&counter.tag)], |ctx, _| {
        let previous = ctx.previous_statement(0)?;
        let flag = ctx.private_input(0)?;
        let must_verify = ctx.boolean(|| flag.value().is_some_and(|v| v.is_one()));
        ctx.constrain_eq(must_verify.var(), &flag);
        // Output the count only when the predecessor is real
        let zero = ctx.constant(StepField::zero());
        let out = ctx.select(&must_verify, &previous.input[0], &zero);
        Ok(RuleOutput::new(vec![out]).with_previous(previous, must_verify))
    });
    let maybe = compile(&tag, CompileConfig::default(), vec![rule])
        .await
        .unwrap();
    let prover = &maybe.provers[0];

    let dummy = counter.verifier.key().dummy_proof().clone();
    let dummy_stmt = dummy_statement(counter.tag.statement());
    assert!(!counter
        .verifier
        .verify(vec![(dummy_stmt.clone(), dummy.clone())])
        .await
        .unwrap());

    let out = prover
        .prove(
            ProveRequest::new(vec![])
                .with_previous(dummy_stmt.clone(), dummy.clone())
                .with_private_input(field(0)),
        )
        .await
        .unwrap();
    assert_eq!(out.statement.output, vec![field(0)]);
    assert!(maybe
        .verifier
        .verify(vec![(out.statement, out.proof)])
        .await
        .unwrap());

    let err = prover
        .prove(
            ProveRequest::new(vec![])
                .with_previous(dummy_stmt, dummy)
                .with_private_input(field(1)),
        )
        .await
        .unwrap_err();
    assert!(err.is_rejection(), "{err}");

    let (real, real_proof) = prove_counter(&counter, 2).await.pop().unwrap();
    let out = prover
        .prove(
            ProveRequest::new(vec![])
                .with_previous(real, real_proof)
                .with_private_input(field(1)),
        )
        .await
        .unwrap();
    assert_eq!(out.statement.output, vec![field(2)]);
    assert!(maybe
        .verifier
        .verify(vec![(out.statement, out.proof)])
        .await
        .unwrap());
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn lookups_need_the_feature_flag() {
    let byte_rule = |flags: FeatureFlags| {
        InductiveRule::new("byte", vec![], |ctx, input| {
            ctx.assert_lookup(&input[0], LookupTable::range(8))?;
            Ok(RuleOutput::new(vec![]))
        })
        .with_feature_flags(flags)
    };

    let tag = Tag::create("no-lookups", StatementShape::new(1, 0), 0, 1);
    let err = compile(&tag, CompileConfig::default(), vec![byte_rule(FeatureFlags::default())])
        .await
        .unwrap_err();
    assert!(matches!(err, PicklesError::Circuit(_)));
    assert!(!tag.is_compiled());

    let tag = Tag::create("bytes", StatementShape::new(1, 0), 0, 1);
    let compiled = compile(
        &tag,
        CompileConfig::default(),
        vec![byte_rule(FeatureFlags { lookup: true })],
    )
    .await
    .unwrap();
    let ok = compiled.provers[0]
        .prove(ProveRequest::new(vec![field(200)]))
        .await
        .unwrap();
    assert!(compiled
        .verifier
        .verify(vec![(ok.statement, ok.proof)])
        .await
        .unwrap());
    let err = compiled.provers[0]
        .prove(ProveRequest::new(vec![field(300)]))
        .await
        .unwrap_err();
    assert!(matches!(err, PicklesError::Unsatisfied { .. }));
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn auxiliary_output_and_prover_data() {
    struct Secret(u64);

    let tag = Tag::create("secret", StatementShape::new(0, 1), 0, 1);
    let rule = InductiveRule::new("reveal-square", vec![], |ctx, _| {
        let secret = ctx.prover_data::<Secret>().map(|s| field(s.0));
        let x = ctx.exists(|| secret.unwrap_or_default());
        let out = ctx.square(&x);
        let aux = secret.map(|s| vec![s]).unwrap_or_default();
        Ok(RuleOutput::new(vec![out]).with_auxiliary_output(aux))
    });
    let compiled = compile(&tag, CompileConfig::default(), vec![rule])
        .await
        .unwrap();

    let shared = compiled.provers[0].prove_shared(ProveRequest::new(vec![]).with_prover_data(Secret(6)));
    let observer = shared.clone();
    let (a, b) = tokio::join!(shared, observer);
    let out = a.unwrap();
    assert_eq!(out, b.unwrap());
    assert_eq!(out.statement.output, vec![field(36)]);
    assert_eq!(out.auxiliary_output, Some(vec![field(6)]));

    let verified = compiled
        .verifier
        .verify_shared(vec![(out.statement, out.proof)]);
    assert_eq!(verified.clone().await, Ok(true));
    assert_eq!(verified.await, Ok(true));
}

macro_rules! configuration_error {
    ($test_name:ident, $tag:expr, $rules:expr) => {
        #[tokio::test]
        async fn $test_name() {
            let tag: Tag = $tag;
            let rules: Vec<InductiveRule> = ($rules)(&tag);
            let err = compile(&tag, CompileConfig::default(), rules)
                .await
                .unwrap_err();
            assert!(matches!(err, PicklesError::Configuration(_)), "{err}");
            assert!(!tag.is_compiled());
        }
    };
}

fn trivial(identifier: &str) -> InductiveRule {
    InductiveRule::new(identifier, vec![], |_, _| Ok(RuleOutput::new(vec![])))
}

fn recursive(identifier: &str, tag: &Tag, slots: usize) -> InductiveRule {
    let predecessors = vec![Predecessor::from(tag); slots];
    InductiveRule::new(identifier, predecessors, move |ctx, _| {
        let mut output = RuleOutput::new(vec![]);
        for slot in 0..slots {
            let previous = ctx.previous_statement(slot)?;
            output = output.with_previous(previous, Boolean::constant(true));
        }
        Ok(output)
    })
}

configuration_error!(
    no_rules,
    Tag::create("empty", StatementShape::new(0, 0), 0, 0),
    |_: &Tag| vec![]
);
configuration_error!(
    branch_count_mismatch,
    Tag::create("two", StatementShape::new(0, 0), 0, 2),
    |_: &Tag| vec![trivial("only")]
);
configuration_error!(
    duplicate_identifiers,
    Tag::create("dup", StatementShape::new(0, 0), 0, 2),
    |_: &Tag| vec![trivial("same"), trivial("same")]
);
configuration_error!(
    too_many_predecessors,
    Tag::create("narrow", StatementShape::new(0, 0), 1, 1),
    |tag: &Tag| vec![recursive("wide", tag, 2)]
);
configuration_error!(
    width_above_limit,
    Tag::create("huge", StatementShape::new(0, 0), MAX_PROOFS_VERIFIED + 1, 1),
    |_: &Tag| vec![trivial("base")]
);
configuration_error!(
    output_arity_mismatch,
    Tag::create("arity", StatementShape::new(0, 1), 0, 1),
    |_: &Tag| vec![trivial("no-output")]
);
configuration_error!(
    predecessor_statement_not_returned,
    Tag::create("forgetful", StatementShape::new(0, 0), 1, 1),
    |tag: &Tag| {
        vec![InductiveRule::new("forget", vec![Predecessor::from(tag)], |_, _| {
            Ok(RuleOutput::new(vec![]))
        })]
    }
);

#[tokio::test]
async fn compiling_twice_or_with_wrong_ids_fails() {
    let tag = Tag::create("once", StatementShape::new(0, 0), 0, 1);
    let compiled = compile(&tag, CompileConfig::default(), vec![trivial("base")])
        .await
        .unwrap();
    let ids = compiled.cache_handle.key_ids();
    assert_eq!(ids.len(), 2);
    assert_eq!(ids[0].kind(), KeyKind::Step);
    assert_eq!(ids[1].kind(), KeyKind::Wrap);
    assert!(matches!(
        compile(&tag, CompileConfig::default(), vec![trivial("base")]).await,
        Err(PicklesError::Configuration(_))
    ));

    let again = Tag::create("once", StatementShape::new(0, 0), 0, 1);
    let config = CompileConfig::default().with_expected_key_ids(ids.clone());
    assert!(compile(&again, config, vec![trivial("base")]).await.is_ok());

    let mut wrong = ids.clone();
    wrong.reverse();
    let other = Tag::create("once", StatementShape::new(0, 0), 0, 1);
    let (store, cache) = memory_cache();
    let config = CompileConfig::new(cache).with_expected_key_ids(wrong);
    assert!(matches!(
        compile(&other, config, vec![trivial("base")]).await,
        Err(PicklesError::KeyMismatch { .. })
    ));
    // Mismatch is detected before anything is generated
    assert!(store.is_empty());
    assert!(!other.is_compiled());
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn predecessor_is_only_needed_when_proving() {
    let later = Tag::create("later", StatementShape::new(0, 0), 0, 1);
    let tag = Tag::create("early", StatementShape::new(0, 0), 1, 1);
    let early = compile(&tag, CompileConfig::default(), vec![recursive("uses-later", &later, 1)])
        .await
        .unwrap();

    let placeholder = crate::compiler::dummy::dummy_proof(0, Default::default());
    let request = ProveRequest::new(vec![]).with_previous(Statement::default(), placeholder);
    assert!(matches!(
        early.provers[0].prove(request).await,
        Err(PicklesError::TagNotCompiled(_))
    ));

    let later = compile(&later, CompileConfig::default(), vec![trivial("base")])
        .await
        .unwrap();
    let base = later.provers[0].prove(ProveRequest::new(vec![])).await.unwrap();
    let out = early.provers[0]
        .prove(ProveRequest::new(vec![]).with_previous(base.statement, base.proof))
        .await
        .unwrap();
    assert!(early
        .verifier
        .verify(vec![(out.statement, out.proof)])
        .await
        .unwrap());
}

#[test]
fn compile_blocking_outside_a_runtime() {
    let tag = Tag::create("blocking", StatementShape::new(1, 1), 0, 1);
    let rule = InductiveRule::new("double", vec![], |ctx, input| {
        let out = ctx.scale(&input[0], field(2));
        Ok(RuleOutput::new(vec![out]))
    });
    let compiled = compile_blocking(&tag, CompileConfig::default(), vec![rule]).unwrap();
    let out = compiled.provers[0]
        .prove_blocking(&ProveRequest::new(vec![field(21)]))
        .unwrap();
    assert_eq!(out.statement.output, vec![field(42)]);
    assert!(compiled
        .verifier
        .verify_blocking(&[(out.statement, out.proof)])
        .unwrap());
}
