/**
 * UPDATER - Polling périodique de la fédération
 *
 * RÔLE :
 * Toutes les 15 minutes (et une fois au démarrage), interroge chaque host connu
 * sur son nombre d'utilisateurs, écrit un TotalCount pour le cycle et maintient
 * le cache du taux d'activité.
 *
 * FONCTIONNEMENT :
 * - Un cycle = update_hosts et ensure_activity_rate en parallèle, erreurs loguées
 * - L'énumération des hosts alimente un JoinSet ; un Semaphore borne à `pool_size`
 *   le nombre de polls en vol, le surplus attend son tour
 * - Fin du cycle = énumération terminée ET plus aucune tâche en file ou en vol.
 *   Un JoinSet vide avant la fin de l'énumération n'est pas une fin
 * - Un poll en échec est logué avec son hostname et compte pour 0, sans retry
 *
 * ÉCRITURES :
 * - hostcount/{hostname} à chaque poll réussi (inchangé en cas d'échec)
 * - totalcount/{timestamp} + lasttotalcount/"0" une fois par cycle terminé
 */

use crate::activity::{ActivityAggregator, RateStatus};
use crate::config::UpdaterConf;
use crate::health::HealthTracker;
use crate::hosts::{HostRegistry, PollError, ScanEvent};
use crate::models::{now_rfc3339, HostCount, TotalCount};
use crate::store::{create_from, kinds, CounterStore, SINGLETON_KEY};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;

/// Bilan d'un cycle de polling
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PollReport {
    pub scanned: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub total: u64,
}

/// Résultat d'un poll individuel ; un échec vaut 0
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HostPoll {
    pub count: u64,
    pub ok: bool,
}

#[derive(Clone)]
pub struct Updater {
    store: Arc<dyn CounterStore>,
    hosts: Arc<dyn HostRegistry>,
    activity: ActivityAggregator,
    config: UpdaterConf,
    health: HealthTracker,
}

impl Updater {
    pub fn new(
        store: Arc<dyn CounterStore>,
        hosts: Arc<dyn HostRegistry>,
        activity: ActivityAggregator,
        config: UpdaterConf,
        health: HealthTracker,
    ) -> Self {
        Self {
            store,
            hosts,
            activity,
            config,
            health,
        }
    }

    /// Lance la boucle périodique ; le premier cycle part immédiatement
    pub fn start(&self) -> JoinHandle<()> {
        let updater = self.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(updater.config.interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::info!(
                interval_secs = updater.config.interval().as_secs(),
                pool_size = updater.config.pool_size(),
                "updater started"
            );

            loop {
                ticker.tick().await;
                updater.run_cycle().await;
            }
        })
    }

    /// Un cycle complet ; n'échoue jamais, les erreurs sont loguées
    pub async fn run_cycle(&self) {
        let (hosts, rate) = tokio::join!(self.update_hosts(), self.ensure_activity_rate());

        match hosts {
            Ok(report) => {
                tracing::info!(
                    scanned = report.scanned,
                    succeeded = report.succeeded,
                    failed = report.failed,
                    count = report.total,
                    "poll cycle completed"
                );
                self.health.record_cycle(report);
            }
            Err(e) => tracing::error!(error = %e, "poll cycle failed"),
        }

        if let Err(e) = rate {
            tracing::error!(error = %e, "activity rate maintenance failed");
        }
    }

    /// Poll de tous les hosts connus puis écriture du TotalCount du cycle
    pub async fn update_hosts(&self) -> anyhow::Result<PollReport> {
        let pool = Arc::new(Semaphore::new(self.config.pool_size()));
        let mut scan = self.hosts.scan();
        let mut tasks: JoinSet<HostPoll> = JoinSet::new();
        let mut report = PollReport::default();
        let mut scan_done = false;

        loop {
            if scan_done && tasks.is_empty() {
                break;
            }

            tokio::select! {
                event = scan.recv(), if !scan_done => match event {
                    Some(ScanEvent::Host(host)) => {
                        report.scanned += 1;
                        let updater = self.clone();
                        let pool = pool.clone();
                        tasks.spawn(async move {
                            // Le semaphore n'est jamais fermé
                            let _permit = pool.acquire_owned().await.ok();
                            updater.update_host(&host.hostname).await
                        });
                    }
                    Some(ScanEvent::Done(result)) => {
                        if let Err(e) = result {
                            tracing::error!(error = %e, "host enumeration failed");
                        }
                        scan_done = true;
                    }
                    None => {
                        tracing::error!("host enumeration ended without completion event");
                        scan_done = true;
                    }
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => match joined {
                    Ok(poll) if poll.ok => {
                        report.succeeded += 1;
                        report.total += poll.count;
                    }
                    Ok(_) => report.failed += 1,
                    Err(e) => {
                        tracing::error!(error = %e, "host poll task aborted");
                        report.failed += 1;
                    }
                },
            }
        }

        let total = TotalCount {
            count: report.total,
            timestamp: now_rfc3339(),
        };
        create_from(self.store.as_ref(), kinds::TOTAL_COUNT, &total.timestamp, &total).await?;
        create_from(self.store.as_ref(), kinds::LAST_TOTAL_COUNT, SINGLETON_KEY, &total).await?;

        Ok(report)
    }

    /// Poll d'un host ; tout échec est logué et vaut 0
    pub async fn update_host(&self, hostname: &str) -> HostPoll {
        match self.poll_host(hostname).await {
            Ok(count) => HostPoll { count, ok: true },
            Err(e) => {
                tracing::warn!(hostname = %hostname, error = %e, "host poll failed");
                HostPoll { count: 0, ok: false }
            }
        }
    }

    async fn poll_host(&self, hostname: &str) -> Result<u64, PollError> {
        let host = self.hosts.ensure_host(hostname).await?;

        tracing::debug!(hostname = %host.hostname, "querying user count");
        let timeout = self.config.request_timeout();
        let count = tokio::time::timeout(timeout, self.hosts.user_count(&host))
            .await
            .map_err(|_| PollError::Timeout(timeout))??;

        let record = HostCount {
            hostname: host.hostname.clone(),
            count,
            timestamp: now_rfc3339(),
        };
        create_from(self.store.as_ref(), kinds::HOST_COUNT, &host.hostname, &record).await?;

        tracing::info!(hostname = %host.hostname, count, "user count saved");
        Ok(count)
    }

    /// Calcule le taux de l'heure écoulée s'il n'est pas déjà en cache
    pub async fn ensure_activity_rate(&self) -> anyhow::Result<RateStatus> {
        let status = self.activity.ensure_rate(OffsetDateTime::now_utc()).await?;
        if let RateStatus::Computed(rate) = status {
            tracing::debug!(rate, "activity rate cache filled");
        }
        Ok(status)
    }
}
