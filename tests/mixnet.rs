//! End-to-end rounds over the in-process transport: the verifiable and
//! trap modes on a small nine-server square network, plus a tampering
//! server that must be caught by the trap cross-check.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ark_ec::Group;
use ark_ff::UniformRand;
use async_trait::async_trait;

use atom_mixnet::client::Client;
use atom_mixnet::config::{Mode, NetworkKind, SystemConfig};
use atom_mixnet::crypto::rand::crypto_rng;
use atom_mixnet::crypto::{Curve, KeyPair, Scalar};
use atom_mixnet::db::Database;
use atom_mixnet::directory::Directory;
use atom_mixnet::rpc::{
    CollectArgs, CommitArgs, DealArgs, FinalizeArgs, LocalNetwork, ProofOkArgs, ReencryptArgs,
    ResponseArgs, RpcError, ServerRpc, ShuffleArgs, SubmitArgs, TrusteeRpc, VerifyReencryptArgs,
    VerifyShuffleArgs,
};
use atom_mixnet::server::{Server, ServerHandle};
use atom_mixnet::trustee::Trustee;

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

fn small_config(mode: Mode, num_trustees: usize) -> SystemConfig {
    SystemConfig {
        mode,
        net: NetworkKind::Square,
        num_servers: 9,
        num_groups: 4,
        per_group: 6,
        num_trustees,
        num_levels: SystemConfig::default_levels(NetworkKind::Square, 4),
        num_msgs: 16,
        msg_size: 10,
        threshold: 5,
    }
}

struct Deployment {
    trustees: Vec<Arc<Trustee<Curve>>>,
    clients: Vec<Client<Curve>>,
}

/// Bring up directory, database, servers, trustees and clients. When
/// `tamper` is set, every server's transport is wrapped so that the first
/// level-0 shuffle hand-off in the deployment gets one ciphertext
/// replaced with garbage.
async fn deploy(params: SystemConfig, tamper: Option<Arc<AtomicBool>>) -> Deployment {
    init_tracing();
    let directory = Directory::<Curve>::new(params, [7u8; 16]);
    let net = Arc::new(LocalNetwork::<Curve>::new(
        params.num_servers,
        params.num_trustees,
    ));
    let db = Arc::new(Database::new());

    let mut rng = crypto_rng();
    let mut setups = Vec::new();

    for id in 0..params.num_servers {
        let server = Server::new(
            id,
            KeyPair::<Curve>::generate(&mut rng),
            vec![Arc::clone(&directory)],
            Arc::clone(&net),
            db.clone(),
        );
        let base: Arc<dyn ServerRpc<Curve>> = Arc::new(ServerHandle::new(Arc::clone(&server)));
        let handle: Arc<dyn ServerRpc<Curve>> = match &tamper {
            Some(flag) => Arc::new(TamperingHandle {
                inner: base,
                tampered: Arc::clone(flag),
            }),
            None => base,
        };
        net.register_server(id, handle);
        setups.push(tokio::spawn(async move {
            server.setup().await.expect("server setup");
        }));
    }

    let mut trustees = Vec::new();
    for id in 0..params.num_trustees {
        let trustee = Trustee::new(
            id,
            KeyPair::<Curve>::generate(&mut rng),
            vec![Arc::clone(&directory)],
        );
        net.register_trustee(id, Arc::clone(&trustee) as Arc<dyn TrusteeRpc<Curve>>);
        trustees.push(Arc::clone(&trustee));
        setups.push(tokio::spawn(async move {
            trustee.setup().await;
            trustee.register_round();
        }));
    }

    for setup in setups {
        setup.await.expect("setup task");
    }

    let mut clients = Vec::new();
    for id in 0..params.num_groups {
        let mut client = Client::new(
            id,
            vec![Arc::clone(&directory)],
            Arc::clone(&net),
            db.clone(),
        );
        client.setup().await;
        clients.push(client);
    }

    Deployment { trustees, clients }
}

async fn submit_all(deployment: &Deployment) -> Vec<Vec<u8>> {
    let mut expected = Vec::new();
    for (gid, client) in deployment.clients.iter().enumerate() {
        let plaintexts = client.gen_rand_plaintexts();
        expected.extend(plaintexts.clone());
        client.submit(gid, 0, &plaintexts).await.expect("submit");
    }
    expected
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn verifiable_mixing_publishes_every_plaintext() {
    let deployment = deploy(small_config(Mode::Verifiable, 0), None).await;
    let mut expected = submit_all(&deployment).await;

    let mut published = deployment.clients[0]
        .download_msgs(0)
        .await
        .expect("download");

    assert_eq!(published.len(), expected.len());
    published.sort();
    expected.sort();
    assert_eq!(published, expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn trap_mixing_publishes_real_plaintexts_only() {
    let deployment = deploy(small_config(Mode::Trap, 2), None).await;
    let mut expected = submit_all(&deployment).await;

    for trustee in &deployment.trustees {
        assert_eq!(trustee.verdict(0).await, Some(true));
    }

    // Trap messages are stripped during the entry-group cross-check; only
    // the decrypted inner ciphertexts reach the database.
    let mut published = deployment.clients[0]
        .download_msgs(0)
        .await
        .expect("download");
    assert_eq!(published.len(), expected.len());
    published.sort();
    expected.sort();
    assert_eq!(published, expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn tampering_server_prevents_publication() {
    let tampered = Arc::new(AtomicBool::new(false));
    let deployment = deploy(small_config(Mode::Trap, 2), Some(Arc::clone(&tampered))).await;
    submit_all(&deployment).await;

    // Every trustee must reject the round and withhold its key share.
    for trustee in &deployment.trustees {
        assert_eq!(trustee.verdict(0).await, Some(false));
    }
    assert!(tampered.load(Ordering::SeqCst));

    // No server publishes: the read never completes.
    let read = deployment.clients[0].download_msgs(0);
    assert!(tokio::time::timeout(Duration::from_secs(2), read)
        .await
        .is_err());
}

/// Transport wrapper modelling a malicious server: the first shuffled
/// batch handed over at level 0 has one ciphertext replaced by random
/// points before delivery.
struct TamperingHandle {
    inner: Arc<dyn ServerRpc<Curve>>,
    tampered: Arc<AtomicBool>,
}

#[async_trait]
impl ServerRpc<Curve> for TamperingHandle {
    async fn deal(&self, args: DealArgs<Curve>) -> Result<(), RpcError> {
        self.inner.deal(args).await
    }

    async fn response(&self, args: ResponseArgs) -> Result<(), RpcError> {
        self.inner.response(args).await
    }

    async fn submit(&self, args: SubmitArgs<Curve>) -> Result<(), RpcError> {
        self.inner.submit(args).await
    }

    async fn commit(&self, args: CommitArgs) -> Result<(), RpcError> {
        self.inner.commit(args).await
    }

    async fn collect(&self, args: CollectArgs<Curve>) -> Result<(), RpcError> {
        self.inner.collect(args).await
    }

    async fn shuffle(&self, mut args: ShuffleArgs<Curve>) -> Result<(), RpcError> {
        if args.info.level == 0 && !self.tampered.swap(true, Ordering::SeqCst) {
            let mut rng = crypto_rng();
            let target = &mut args.ciphertexts[0];
            for point in target.r.iter_mut().chain(target.c.iter_mut()) {
                *point = Curve::generator() * Scalar::rand(&mut rng);
            }
        }
        self.inner.shuffle(args).await
    }

    async fn verify_shuffle(&self, args: VerifyShuffleArgs<Curve>) -> Result<(), RpcError> {
        self.inner.verify_shuffle(args).await
    }

    async fn shuffle_ok(&self, args: ProofOkArgs) -> Result<(), RpcError> {
        self.inner.shuffle_ok(args).await
    }

    async fn reencrypt(&self, args: ReencryptArgs<Curve>) -> Result<(), RpcError> {
        self.inner.reencrypt(args).await
    }

    async fn verify_reencrypt(&self, args: VerifyReencryptArgs<Curve>) -> Result<(), RpcError> {
        self.inner.verify_reencrypt(args).await
    }

    async fn reencrypt_ok(&self, args: ProofOkArgs) -> Result<(), RpcError> {
        self.inner.reencrypt_ok(args).await
    }

    async fn finalize(&self, args: FinalizeArgs<Curve>) -> Result<(), RpcError> {
        self.inner.finalize(args).await
    }

    async fn ping(&self) -> Result<(), RpcError> {
        self.inner.ping().await
    }
}
