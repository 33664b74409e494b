use anyhow::Result;
use serde::Deserialize;
use serde_json::Value;
use sqlx::Row;
use std::collections::{HashSet, VecDeque};
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::app::payload::sanitize;
use crate::domain::notification::PushRequest;
use crate::infra::db::Db;

const FETCH_LIMIT: i64 = 50;
const BASE_POLL_MS: u64 = 2_000;
const MAX_BACKOFF_MS: u64 = 30_000;
const DEDUP_HIGH_WATER: usize = 500;

/// Poll interval after `errors` consecutive fetch failures:
/// `min(2000 * 2^errors, 30000)` ms, so zero errors yields the nominal
/// 2-second interval and a store outage never produces a tight retry loop.
pub fn backoff(errors: u32) -> Duration {
    let multiplier = 1u64 << errors.min(4);
    Duration::from_millis((BASE_POLL_MS * multiplier).min(MAX_BACKOFF_MS))
}

/// Identifiers already handed to the dispatcher in this process lifetime.
///
/// Bounded at a high-water mark with oldest-first eviction; the store-level
/// delivered flag is the real source of truth, this set only prevents
/// re-dispatch over a short horizon.
#[derive(Debug)]
pub struct DedupSet {
    capacity: usize,
    seen: HashSet<Uuid>,
    order: VecDeque<Uuid>,
}

impl DedupSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            seen: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.seen.contains(id)
    }

    pub fn insert(&mut self, id: Uuid) {
        if !self.seen.insert(id) {
            return;
        }
        self.order.push_back(id);
        while self.seen.len() > self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.seen.remove(&oldest);
                }
                None => break,
            }
        }
    }

    /// Removes the id from both the set and the eviction queue, keeping the
    /// two in lockstep. The loop runs forever, so a rolled-back id must not
    /// leave a queue entry behind: the queue would grow without bound under
    /// repeated insert/remove cycles, and a stale entry could evict a
    /// re-inserted id ahead of older live ones.
    pub fn remove(&mut self, id: &Uuid) {
        if self.seen.remove(id) {
            self.order.retain(|entry| entry != id);
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

struct OutboxRow {
    id: Uuid,
    user_id: Uuid,
    title: Option<String>,
    body: String,
    channel: String,
    room_id: Option<Uuid>,
    post_id: Option<Uuid>,
    sender_id: Option<Uuid>,
}

impl OutboxRow {
    fn to_request(&self) -> PushRequest {
        PushRequest {
            id: Some(self.id),
            user_id: self.user_id,
            title: self.title.as_deref().map(sanitize),
            body: sanitize(&self.body),
            notification_type: None,
            channel: self.channel.clone(),
            room_id: self.room_id,
            post_id: self.post_id,
            sender_id: self.sender_id,
            message_id: None,
            data: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DispatchAck {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    skipped: bool,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    sent: Option<usize>,
    #[serde(default)]
    failed: Option<usize>,
    #[serde(default)]
    error: Option<Value>,
}

/// Discovers undelivered notification intents and drives each one through
/// the dispatcher exactly once per dedup horizon. Single active instance
/// assumed; the loop runs until process termination.
pub struct OutboxPoller {
    db: Db,
    http: reqwest::Client,
    dispatch_url: String,
    dedup: DedupSet,
    consecutive_errors: u32,
}

impl OutboxPoller {
    pub fn new(db: Db, http: reqwest::Client, dispatch_url: String) -> Self {
        Self {
            db,
            http,
            dispatch_url,
            dedup: DedupSet::new(DEDUP_HIGH_WATER),
            consecutive_errors: 0,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        info!(dispatch_url = %self.dispatch_url, "outbox poller started");
        loop {
            self.run_once().await;
            tokio::time::sleep(backoff(self.consecutive_errors)).await;
        }
    }

    /// One poll cycle: fetch undelivered rows, drive each new one through
    /// the dispatcher, update the consecutive-error counter.
    pub async fn run_once(&mut self) {
        match self.fetch_undelivered().await {
            Ok(notifications) => {
                self.consecutive_errors = 0;
                for notification in notifications {
                    self.process(notification).await;
                }
            }
            Err(err) => {
                self.consecutive_errors = self.consecutive_errors.saturating_add(1);
                warn!(
                    error = ?err,
                    errors = self.consecutive_errors,
                    "failed to fetch undelivered notifications, backing off"
                );
            }
        }
    }

    async fn process(&mut self, notification: OutboxRow) {
        if self.dedup.contains(&notification.id) {
            return;
        }
        // Gate before dispatching so a concurrent cycle cannot double-send.
        self.dedup.insert(notification.id);

        match self.dispatch(&notification).await {
            Ok(ack) => {
                if ack.skipped {
                    info!(
                        id = %notification.id,
                        reason = ack.reason.as_deref().unwrap_or("unknown"),
                        "push skipped"
                    );
                } else if ack.success {
                    info!(
                        id = %notification.id,
                        sent = ack.sent.unwrap_or(0),
                        failed = ack.failed.unwrap_or(0),
                        "push sent"
                    );
                } else {
                    warn!(id = %notification.id, error = ?ack.error, "push dispatch reported failure");
                }

                // Delivered is terminal regardless of the dispatch outcome;
                // a failed write is swallowed, the dedup set holds the line
                // until eviction.
                if let Err(err) = self.mark_delivered(notification.id).await {
                    warn!(error = ?err, id = %notification.id, "failed to mark notification delivered");
                }
            }
            Err(err) => {
                error!(error = ?err, id = %notification.id, "push dispatch failed, will retry next cycle");
                self.dedup.remove(&notification.id);
            }
        }
    }

    async fn fetch_undelivered(&self) -> Result<Vec<OutboxRow>> {
        let rows = sqlx::query(
            "SELECT id, user_id, title, body, channel, room_id, post_id, sender_id \
             FROM notifications \
             WHERE delivered = FALSE \
             ORDER BY created_at DESC \
             LIMIT $1",
        )
        .bind(FETCH_LIMIT)
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| OutboxRow {
                id: row.get("id"),
                user_id: row.get("user_id"),
                title: row.get("title"),
                body: row.get("body"),
                channel: row.get("channel"),
                room_id: row.get("room_id"),
                post_id: row.get("post_id"),
                sender_id: row.get("sender_id"),
            })
            .collect())
    }

    /// A transport or parse failure here means no structured result was
    /// obtained; the caller rolls back the dedup entry and leaves the row
    /// undelivered for the next cycle.
    async fn dispatch(&self, notification: &OutboxRow) -> Result<DispatchAck> {
        let request = notification.to_request();
        let response = self
            .http
            .post(&self.dispatch_url)
            .json(&request)
            .send()
            .await?;
        let ack: DispatchAck = response.json().await?;
        Ok(ack)
    }

    async fn mark_delivered(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE notifications SET delivered = TRUE WHERE id = $1")
            .bind(id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }
}
