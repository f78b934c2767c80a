use std::sync::Arc;

use blsftcosi::{
    signing::{subtree::ParticipantError, Msg},
    ParticipantIndex, Scheme, Tree,
};
use rand::{CryptoRng, Rng, RngCore};
use round_based::simulation::Simulation;

/// Tree of participants along with their secret keys
pub struct Network<S: Scheme> {
    pub tree: Arc<Tree<S>>,
    pub secret_keys: Vec<S::SecretKey>,
}

impl<S: Scheme> Network<S> {
    /// Complete tree of `n` participants where every participant has up to `branching` children
    pub fn nary(rng: &mut (impl RngCore + CryptoRng), n: u16, branching: u16) -> Self {
        let secret_keys = generate_keys::<S>(rng, n);
        let public_keys = secret_keys.iter().map(S::public_key).collect();
        let tree = Tree::nary(public_keys, branching).unwrap();
        Self {
            tree: Arc::new(tree),
            secret_keys,
        }
    }

    /// Tree of `n` participants where the parent of each participant is chosen at random
    pub fn random(rng: &mut (impl RngCore + CryptoRng), n: u16) -> Self {
        let secret_keys = generate_keys::<S>(rng, n);
        let public_keys = secret_keys.iter().map(S::public_key).collect();
        let parents = (0..n)
            .map(|i| (i > 0).then(|| rng.gen_range(0..i)))
            .collect::<Vec<_>>();
        let tree = Tree::from_parents(public_keys, &parents).unwrap();
        Self {
            tree: Arc::new(tree),
            secret_keys,
        }
    }

    pub fn len(&self) -> u16 {
        self.tree.len()
    }

    pub fn root_key(&self) -> S::SecretKey {
        self.secret_keys[0].clone()
    }

    /// Starts building a round proposed by the root
    pub fn signing(&self, msg: &[u8]) -> blsftcosi::signing::root::SigningBuilder<S> {
        blsftcosi::signing(self.tree.clone(), self.root_key(), msg.to_vec())
    }
}

pub fn generate_keys<S: Scheme>(rng: &mut (impl RngCore + CryptoRng), n: u16) -> Vec<S::SecretKey> {
    (0..n)
        .map(|_| S::generate_secret_key(rng).unwrap())
        .collect()
}

/// How a participant behaves in the round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    /// Signs any proposal
    Honest,
    /// Relays messages, but refuses to sign
    Refuse,
    /// Never takes part in the round
    Silent,
}

/// Adds every participant except the root to the simulation and spawns their tasks
///
/// Root must be added to the simulation before calling this function, so it gets index `0`.
pub fn spawn_participants<S: Scheme>(
    network: &Network<S>,
    simulation: &mut Simulation<Msg>,
    behaviour: impl Fn(ParticipantIndex) -> Behaviour,
) -> Vec<tokio::task::JoinHandle<Result<(), ParticipantError>>> {
    let mut tasks = vec![];
    for i in 1..network.len() {
        let party = simulation.add_party();
        let participant = blsftcosi::participant(
            i,
            network.tree.clone(),
            network.secret_keys[usize::from(i)].clone(),
        );
        match behaviour(i) {
            Behaviour::Honest => tasks.push(tokio::spawn(participant.serve(party))),
            Behaviour::Refuse => tasks.push(tokio::spawn(
                participant
                    .set_verification(|_: ParticipantIndex, _: &[u8]| false)
                    .serve(party),
            )),
            Behaviour::Silent => drop(party),
        }
    }
    tasks
}

/// Installs a tracing subscriber that prints logs filtered by `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Asserts that the aggregate is signed by every participant except `excluded`, and that it
/// verifies
pub fn assert_signed_by<S: Scheme>(
    network: &Network<S>,
    msg: &[u8],
    aggregate: &blsftcosi::FinalAggregate,
    excluded: &[ParticipantIndex],
) {
    let signed = (0..network.len())
        .filter(|i| !excluded.contains(i))
        .collect::<Vec<_>>();
    assert_eq!(aggregate.mask().iter().collect::<Vec<_>>(), signed);

    let public_keys = network.tree.public_keys();
    S::verify_aggregate(&public_keys, msg, aggregate.signature(), aggregate.mask()).unwrap();
    blsftcosi::verify::<S>(
        &public_keys,
        msg,
        &aggregate.to_bytes(),
        blsftcosi::Policy::Threshold(aggregate.participants()),
    )
    .unwrap();
}

/// Random message of random length
pub fn random_msg(rng: &mut impl RngCore) -> Vec<u8> {
    let mut msg = vec![0u8; rng.gen_range(1..=100)];
    rng.fill_bytes(&mut msg);
    msg
}
