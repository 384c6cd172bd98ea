//! Trustees cross-check the entry groups' trap reports and release their
//! per-round key shares only when every report is consistent. Trap
//! violations therefore prevent decryption of the round altogether.

use std::collections::HashMap;
use std::sync::Arc;

use ark_ec::CurveGroup;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use crate::config::SystemConfig;
use crate::crypto::{combine_public_keys, KeyPair};
use crate::directory::Directory;
use crate::rpc::{ReportArgs, ReportReply, RpcError, TrusteeRpc};

const LOG_TARGET: &str = "atom::trustee";

struct RoundCheck {
    reports: mpsc::Sender<ReportArgs>,
    verdict: watch::Receiver<Option<bool>>,
}

/// A trustee instance. The long-term keypair doubles as the per-round
/// keypair; deriving true per-round ephemerals is a directory protocol
/// extension.
pub struct Trustee<C: CurveGroup> {
    id: usize,
    keypair: KeyPair<C>,
    directories: Vec<Arc<Directory<C>>>,

    params: Mutex<Option<SystemConfig>>,
    trustee_keys: Mutex<Vec<C>>,
    rounds: DashMap<u32, RoundCheck>,
    next_round: Mutex<u32>,
}

impl<C: CurveGroup> Trustee<C> {
    pub fn new(id: usize, keypair: KeyPair<C>, directories: Vec<Arc<Directory<C>>>) -> Arc<Self> {
        Arc::new(Self {
            id,
            keypair,
            directories,
            params: Mutex::new(None),
            trustee_keys: Mutex::new(Vec::new()),
            rounds: DashMap::new(),
            next_round: Mutex::new(0),
        })
    }

    pub fn public_key(&self) -> C {
        self.keypair.public
    }

    /// Register with every directory replica and fetch the deployment
    /// parameters and the other trustees' keys.
    pub async fn setup(&self) {
        for directory in &self.directories {
            directory.register_trustee(self.id, self.keypair.public);
        }
        let snapshot = self.directories[0].directory().await;
        *self.params.lock() = Some(snapshot.params);
        *self.trustee_keys.lock() = snapshot.trustee_keys;
        tracing::info!(target: LOG_TARGET, id = self.id, "trustee setup complete");
    }

    /// Open the next round: allocate its report channel, spawn the
    /// cross-checker, and register the combined round key.
    pub fn register_round(&self) -> u32 {
        let round = {
            let mut next = self.next_round.lock();
            let round = *next;
            *next += 1;
            round
        };

        let num_reports = self.num_reports();
        let (report_tx, report_rx) = mpsc::channel(num_reports.max(1));
        let (verdict_tx, verdict_rx) = watch::channel(None);
        self.rounds.insert(
            round,
            RoundCheck {
                reports: report_tx,
                verdict: verdict_rx,
            },
        );

        let id = self.id;
        tokio::spawn(Self::check_reports(
            id,
            round,
            report_rx,
            verdict_tx,
            num_reports,
        ));

        let round_key = combine_public_keys(&self.trustee_keys.lock());
        for directory in &self.directories {
            if let Err(err) = directory.register_round(round, round_key) {
                tracing::error!(target: LOG_TARGET, round, error = %err, "round key registration failed");
            }
        }
        round
    }

    /// Wait for the round's verdict; exposed so harnesses can observe
    /// rejections without racing the reporters.
    pub async fn verdict(&self, round: u32) -> Option<bool> {
        let mut rx = self.rounds.get(&round)?.verdict.clone();
        let seen = rx.wait_for(Option::is_some).await.ok()?;
        *seen
    }

    fn num_reports(&self) -> usize {
        let params =
            (*self.params.lock()).expect("trustee setup must complete before rounds open");
        params.num_groups * params.threshold
    }

    /// Accept every expected report, then release one verdict for all
    /// blocked reporters. A round is rejected when any flag is false, when
    /// two reports for the same group disagree, or when traps and messages
    /// do not balance across groups.
    async fn check_reports(
        id: usize,
        round: u32,
        mut reports: mpsc::Receiver<ReportArgs>,
        verdict: watch::Sender<Option<bool>>,
        num_reports: usize,
    ) {
        let mut total_traps: HashMap<u64, usize> = HashMap::new();
        let mut total_msgs: HashMap<u64, usize> = HashMap::new();
        let mut good = true;

        for _ in 0..num_reports {
            let Some(report) = reports.recv().await else {
                good = false;
                break;
            };
            if !report.correct_hash || !report.correct_traps || !report.no_dups {
                tracing::warn!(
                    target: LOG_TARGET,
                    round,
                    sid = report.sid,
                    uid = report.uid,
                    correct_hash = report.correct_hash,
                    correct_traps = report.correct_traps,
                    no_dups = report.no_dups,
                    "entry group flagged the round"
                );
                good = false;
            }
            let traps = *total_traps.entry(report.uid).or_insert(report.num_traps);
            let msgs = *total_msgs.entry(report.uid).or_insert(report.num_msgs);
            if traps != report.num_traps || msgs != report.num_msgs {
                tracing::warn!(
                    target: LOG_TARGET,
                    round,
                    uid = report.uid,
                    "inconsistent counts across reports"
                );
                good = false;
            }
        }

        let sum_traps: usize = total_traps.values().sum();
        let sum_msgs: usize = total_msgs.values().sum();
        if sum_traps != sum_msgs {
            tracing::warn!(
                target: LOG_TARGET,
                round,
                sum_traps,
                sum_msgs,
                "trap count does not balance message count"
            );
            good = false;
        }

        tracing::info!(target: LOG_TARGET, id, round, good, "round verdict");
        let _ = verdict.send(Some(good));
    }
}

#[async_trait]
impl<C: CurveGroup> TrusteeRpc<C> for Trustee<C> {
    async fn report(&self, args: ReportArgs) -> Result<ReportReply<C>, RpcError> {
        let (reports, mut verdict) = {
            let Some(round) = self.rounds.get(&args.round) else {
                return Err(RpcError::Remote(format!("unknown round {}", args.round)));
            };
            (round.reports.clone(), round.verdict.clone())
        };

        reports
            .send(args)
            .await
            .map_err(|_| RpcError::Remote("round checker gone".into()))?;

        let good = {
            let seen = verdict
                .wait_for(Option::is_some)
                .await
                .map_err(|_| RpcError::Remote("round checker gone".into()))?;
            (*seen).unwrap_or(false)
        };

        if good {
            Ok(ReportReply {
                private: self.keypair.private,
            })
        } else {
            Err(RpcError::RoundRejected)
        }
    }
}
