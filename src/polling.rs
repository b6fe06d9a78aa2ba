// Polling loop
// Drives the portal session and the availability engine over time: polls for dates, books
// better ones, advances the held booking and decides how long to sleep between cycles.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::{
    availability::AvailabilityEngine,
    backoff::BackoffPolicy,
    config::Config,
    dates::CalendarDate,
    portal::{Portal, PortalError, SessionContext},
};

/// Loop-owned mutable state, carried across re-logins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollingState {
    pub current_booked_date: CalendarDate,
    pub target_date: Option<CalendarDate>,
    pub min_date: Option<CalendarDate>,
    pub consecutive_failures: u32,
}

impl PollingState {
    pub fn new(
        current_booked_date: CalendarDate,
        target_date: Option<CalendarDate>,
        min_date: Option<CalendarDate>,
    ) -> Self {
        Self {
            current_booked_date,
            target_date,
            min_date,
            consecutive_failures: 0,
        }
    }

    pub fn reset_failures(&mut self) {
        self.consecutive_failures = 0;
    }

    // returns the updated count
    pub fn record_failure(&mut self) -> u32 {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_failures
    }

    pub fn target_reached(&self, booked: CalendarDate) -> bool {
        self.target_date.map_or(false, |target| booked <= target)
    }
}

#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub schedule_id: String,
    pub facility_id: String,
    pub refresh_delay: Duration,
    pub backoff: BackoffPolicy,
    pub dry_run: bool,
}

impl LoopSettings {
    pub fn from_config(cfg: &Config, dry_run: bool) -> Self {
        Self {
            schedule_id: cfg.schedule_id.clone(),
            facility_id: cfg.facility_id.clone(),
            refresh_delay: cfg.refresh_delay(),
            backoff: cfg.backoff(),
            dry_run,
        }
    }
}

/// What a single polling cycle asks the loop to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Sleep(Duration),
    TargetReached(CalendarDate),
}

#[derive(Debug)]
enum Phase {
    Init,
    Polling(SessionContext),
    Backoff(Duration),
}

pub struct PollingLoop<P: Portal> {
    portal: P,
    engine: AvailabilityEngine,
    settings: LoopSettings,
    state: PollingState,
}

impl<P: Portal> PollingLoop<P> {
    pub fn new(
        portal: P,
        engine: AvailabilityEngine,
        settings: LoopSettings,
        state: PollingState,
    ) -> Self {
        Self {
            portal,
            engine,
            settings,
            state,
        }
    }

    pub fn state(&self) -> &PollingState {
        &self.state
    }

    #[cfg(test)]
    pub fn portal(&self) -> &P {
        &self.portal
    }

    /// Runs until a booking lands on or before the target date.
    ///
    /// Never gives up otherwise: transient faults back off and log in again, session and
    /// portal errors log in again immediately.
    pub async fn run(&mut self) -> CalendarDate {
        let mut phase = Phase::Init;

        loop {
            phase = match phase {
                Phase::Init => match self.portal.login().await {
                    Ok(ctx) => {
                        info!("session established");
                        Phase::Polling(ctx)
                    }
                    Err(e) => self.on_error(e),
                },
                Phase::Polling(ctx) => match self.run_cycle(&ctx).await {
                    Ok(CycleOutcome::Sleep(delay)) => {
                        debug!(delay_secs = delay.as_secs_f64(), "sleeping until next poll");
                        tokio::time::sleep(delay).await;
                        Phase::Polling(ctx)
                    }
                    Ok(CycleOutcome::TargetReached(date)) => return date,
                    Err(e) => self.on_error(e),
                },
                Phase::Backoff(delay) => {
                    tokio::time::sleep(delay).await;
                    Phase::Init
                }
            };
        }
    }

    fn on_error(&mut self, err: PortalError) -> Phase {
        if err.is_transient() {
            let failures = self.state.record_failure();
            let delay = self.settings.backoff.delay(failures);
            warn!(
                error = %err,
                consecutive_failures = failures,
                delay_secs = delay.as_secs_f64(),
                "transient error, backing off before logging in again"
            );
            Phase::Backoff(delay)
        } else {
            warn!(error = %err, "session/authentication error, retrying immediately");
            Phase::Init
        }
    }

    /// One poll: query dates, maybe book, update state, pick the sleep interval.
    pub async fn run_cycle(&mut self, ctx: &SessionContext) -> Result<CycleOutcome, PortalError> {
        let dates = self
            .portal
            .query_available_dates(ctx, &self.settings.schedule_id, &self.settings.facility_id)
            .await?;

        let decision = self.engine.decide(
            &dates,
            self.state.current_booked_date,
            self.state.min_date,
        )?;

        if !decision.should_long_sleep {
            self.state.reset_failures();
        }

        if let Some(date) = decision.date {
            if self.attempt_booking(ctx, date).await? {
                self.state.current_booked_date = date;

                if self.state.target_reached(date) {
                    info!(%date, "Target date reached! Successfully booked appointment");
                    return Ok(CycleOutcome::TargetReached(date));
                }
            }
        }

        if decision.should_long_sleep {
            let failures = self.state.record_failure();
            let delay = self.settings.backoff.delay(failures);
            info!(
                consecutive_failures = failures,
                delay_secs = delay.as_secs_f64(),
                "No dates available from API, backing off"
            );
            Ok(CycleOutcome::Sleep(delay))
        } else {
            Ok(CycleOutcome::Sleep(self.settings.refresh_delay))
        }
    }

    // false when the date has no bookable time slot
    async fn attempt_booking(
        &self,
        ctx: &SessionContext,
        date: CalendarDate,
    ) -> Result<bool, PortalError> {
        let schedule_id = &self.settings.schedule_id;
        let facility_id = &self.settings.facility_id;

        let Some(time) = self
            .portal
            .query_available_time(ctx, schedule_id, facility_id, date)
            .await?
        else {
            info!(%date, "no available time slots for date");
            return Ok(false);
        };

        if self.settings.dry_run {
            info!(%date, %time, "[DRY RUN] Would book appointment (not actually booking)");
            return Ok(true);
        }

        self.portal
            .book(ctx, schedule_id, facility_id, date, &time)
            .await?;
        info!(%date, %time, "booked time");
        Ok(true)
    }
}
