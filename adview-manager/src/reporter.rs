use std::{sync::Arc, time::Duration};

use adview_primitives::AdvertisementId;
use slog::{debug, o, warn, Logger};
use tokio::task::JoinHandle;

use crate::{error::ClickError, AdProvider};

/// Reports clicks to the ad service without ever failing the caller.
///
/// Every report runs on its own task, bounded by a timeout.
/// Failures are logged and never retried.
pub struct ClickReporter<P> {
    provider: Arc<P>,
    timeout: Duration,
    logger: Logger,
}

impl<P> Clone for ClickReporter<P> {
    fn clone(&self) -> Self {
        Self {
            provider: self.provider.clone(),
            timeout: self.timeout,
            logger: self.logger.clone(),
        }
    }
}

impl<P: AdProvider> ClickReporter<P> {
    pub fn new(provider: Arc<P>, timeout: Duration, logger: &Logger) -> Self {
        Self {
            provider,
            timeout,
            logger: logger.new(o!("module" => "click-reporter")),
        }
    }

    /// Issues the report and returns right away.
    ///
    /// The returned handle is only useful to wait for the report in tests,
    /// it can be dropped without cancelling the report.
    pub fn report_click(&self, ad: &AdvertisementId) -> JoinHandle<()> {
        let reporter = self.clone();
        let ad = ad.clone();

        tokio::spawn(async move {
            match reporter.send(&ad).await {
                Ok(()) => debug!(&reporter.logger, "Click reported"; "ad" => %ad),
                Err(err) => warn!(&reporter.logger, "Failed to report click"; "ad" => %ad, "error" => %err),
            }
        })
    }

    async fn send(&self, ad: &AdvertisementId) -> Result<(), ClickError> {
        match tokio::time::timeout(self.timeout, self.provider.report_click(ad)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(ClickError::Provider {
                ad: ad.clone(),
                source: Box::new(err),
            }),
            Err(_elapsed) => Err(ClickError::TimedOut {
                ad: ad.clone(),
                timeout: self.timeout,
            }),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::provider::Dummy;
    use adview_primitives::test_util::discard_logger;
    use pretty_assertions::assert_eq;

    fn setup_reporter(timeout: Duration) -> (Dummy, ClickReporter<Dummy>) {
        let dummy = Dummy::new();
        let reporter = ClickReporter::new(Arc::new(dummy.clone()), timeout, &discard_logger());

        (dummy, reporter)
    }

    #[tokio::test]
    async fn reports_the_click() {
        let (dummy, reporter) = setup_reporter(Duration::from_secs(5));
        let ad = AdvertisementId::new("sidebar-0");

        reporter
            .report_click(&ad)
            .await
            .expect("Task should not panic");

        assert_eq!(1, dummy.click_count(&ad));
    }

    #[tokio::test]
    async fn failures_are_swallowed() {
        let (dummy, reporter) = setup_reporter(Duration::from_secs(5));
        let ad = AdvertisementId::new("sidebar-0");
        dummy.set_failing_clicks(true);

        reporter
            .report_click(&ad)
            .await
            .expect("Task should not panic");

        assert_eq!(0, dummy.click_count(&ad));
        // not retried
        dummy.set_failing_clicks(false);
        tokio::task::yield_now().await;
        assert_eq!(0, dummy.click_count(&ad));
    }

    #[tokio::test(start_paused = true)]
    async fn does_not_wait_for_the_ad_service() {
        let (dummy, reporter) = setup_reporter(Duration::from_secs(5));
        let ad = AdvertisementId::new("sidebar-0");
        dummy.set_click_latency(Duration::from_secs(2));

        let start = tokio::time::Instant::now();
        let report = reporter.report_click(&ad);
        assert_eq!(start, tokio::time::Instant::now());
        assert_eq!(0, dummy.click_count(&ad));

        report.await.expect("Task should not panic");
        assert_eq!(1, dummy.click_count(&ad));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_reports_time_out() {
        let (dummy, reporter) = setup_reporter(Duration::from_secs(1));
        let ad = AdvertisementId::new("sidebar-0");
        dummy.set_click_latency(Duration::from_secs(30));

        let start = tokio::time::Instant::now();
        reporter
            .report_click(&ad)
            .await
            .expect("Task should not panic");

        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(0, dummy.click_count(&ad));
    }
}
