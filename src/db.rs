use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{FamilyRow, HistoryFlags, RawComm, RawEvent, SavedBrief};
use crate::run::{BriefRecord, BriefStore, RunOptions, RunScope, RunStatus};
use crate::summary::resolve_week_range;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn week_bounds_utc(week_start: NaiveDate, week_end: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let lo = Utc.from_utc_datetime(&week_start.and_time(NaiveTime::MIN));
    // Fetch through the end of the week_end day; the normalizer applies its
    // own exclusive cutoff.
    let hi = Utc.from_utc_datetime(&(week_end + Duration::days(1)).and_time(NaiveTime::MIN));
    (lo, hi)
}

/// Postgres-backed store for runs, roster, signals, and briefs.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BriefStore for PgStore {
    async fn create_run(
        &self,
        week_start: NaiveDate,
        week_end: NaiveDate,
        options: &RunOptions,
    ) -> anyhow::Result<Uuid> {
        let row = sqlx::query(
            r#"
            INSERT INTO weekly_brief.brief_runs
            (id, organization_id, school_id, week_start_date, week_end_date,
             triggered_by, dry_run, status, started_at, created_by_user_id, created_by_role)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(options.scope.organization_id)
        .bind(options.scope.school_id)
        .bind(week_start)
        .bind(week_end)
        .bind(&options.trigger)
        .bind(options.dry_run)
        .bind(RunStatus::Started.as_str())
        .bind(Utc::now())
        .bind(options.created_by_user_id)
        .bind(options.created_by_role.as_deref())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("id"))
    }

    async fn finish_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        generated_count: Option<usize>,
        error: Option<&str>,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE weekly_brief.brief_runs
            SET status = $2, finished_at = $3, generated_count = $4, error = $5
            WHERE id = $1
            "#,
        )
        .bind(run_id)
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(generated_count.map(|c| c as i32))
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn eligible_families(
        &self,
        scope: &RunScope,
        limit: Option<usize>,
    ) -> anyhow::Result<Vec<FamilyRow>> {
        let mut query = String::from(
            "SELECT r.parent_user_id, r.child_id, r.first_name, r.birthdate, \
             r.accommodations, r.school_id \
             FROM weekly_brief.roster r \
             WHERE TRUE",
        );

        let scoped = scope.school_id.is_some() || scope.organization_id.is_some();
        if scope.school_id.is_some() {
            query.push_str(" AND r.school_id = $1");
        } else if scope.organization_id.is_some() {
            query.push_str(
                " AND r.school_id IN \
                 (SELECT id FROM weekly_brief.schools WHERE organization_id = $1)",
            );
        }
        query.push_str(" ORDER BY r.parent_user_id, r.child_id");
        if limit.is_some() {
            query.push_str(if scoped { " LIMIT $2" } else { " LIMIT $1" });
        }

        let mut rows = sqlx::query(&query);
        if let Some(school_id) = scope.school_id {
            rows = rows.bind(school_id);
        } else if let Some(organization_id) = scope.organization_id {
            rows = rows.bind(organization_id);
        }
        if let Some(limit) = limit {
            rows = rows.bind(limit as i64);
        }

        let records = rows.fetch_all(&self.pool).await?;
        let mut families = Vec::with_capacity(records.len());
        for row in records {
            families.push(FamilyRow {
                parent_user_id: row.get("parent_user_id"),
                child_id: row.get("child_id"),
                first_name: row.get("first_name"),
                birthdate: row.get("birthdate"),
                accommodations: row.get("accommodations"),
                school_id: row.get("school_id"),
            });
        }
        Ok(families)
    }

    async fn school_events(
        &self,
        school_id: Uuid,
        week_start: NaiveDate,
        week_end: NaiveDate,
    ) -> anyhow::Result<Vec<RawEvent>> {
        let (lo, hi) = week_bounds_utc(week_start, week_end);
        let records = sqlx::query(
            r#"
            SELECT id, title, description, starts_at
            FROM weekly_brief.school_events
            WHERE school_id = $1 AND starts_at >= $2 AND starts_at < $3
            ORDER BY starts_at
            "#,
        )
        .bind(school_id)
        .bind(lo)
        .bind(hi)
        .fetch_all(&self.pool)
        .await?;

        let mut events = Vec::with_capacity(records.len());
        for row in records {
            events.push(RawEvent {
                id: row.get("id"),
                title: row.get("title"),
                description: row.get("description"),
                starts_at: row.get("starts_at"),
            });
        }
        Ok(events)
    }

    async fn school_announcements(
        &self,
        school_id: Uuid,
        week_start: NaiveDate,
        week_end: NaiveDate,
    ) -> anyhow::Result<Vec<RawComm>> {
        let (lo, hi) = week_bounds_utc(week_start, week_end);
        let records = sqlx::query(
            r#"
            SELECT id, title, body, created_at
            FROM weekly_brief.announcements
            WHERE school_id = $1 AND created_at >= $2 AND created_at < $3
            ORDER BY created_at
            "#,
        )
        .bind(school_id)
        .bind(lo)
        .bind(hi)
        .fetch_all(&self.pool)
        .await?;

        let mut comms = Vec::with_capacity(records.len());
        for row in records {
            comms.push(RawComm {
                id: row.get("id"),
                title: row.get("title"),
                body: row.get("body"),
                created_at: row.get("created_at"),
            });
        }
        Ok(comms)
    }

    async fn parent_messages(
        &self,
        parent_user_id: Uuid,
        week_start: NaiveDate,
        week_end: NaiveDate,
    ) -> anyhow::Result<Vec<RawComm>> {
        let (lo, hi) = week_bounds_utc(week_start, week_end);
        let records = sqlx::query(
            r#"
            SELECT id, subject, body, created_at
            FROM weekly_brief.messages
            WHERE recipient_user_id = $1 AND created_at >= $2 AND created_at < $3
            ORDER BY created_at
            "#,
        )
        .bind(parent_user_id)
        .bind(lo)
        .bind(hi)
        .fetch_all(&self.pool)
        .await?;

        let mut comms = Vec::with_capacity(records.len());
        for row in records {
            comms.push(RawComm {
                id: row.get("id"),
                title: row.get("subject"),
                body: row.get("body"),
                created_at: row.get("created_at"),
            });
        }
        Ok(comms)
    }

    async fn family_history(
        &self,
        parent_user_id: Uuid,
        child_id: Uuid,
        prev_week_start: NaiveDate,
    ) -> anyhow::Result<HistoryFlags> {
        let current_week_start = prev_week_start + Duration::days(7);
        let row = sqlx::query(
            r#"
            SELECT
                EXISTS(
                    SELECT 1 FROM weekly_brief.briefs
                    WHERE parent_user_id = $1 AND child_id = $2 AND week_start < $3
                ) AS has_history,
                EXISTS(
                    SELECT 1 FROM weekly_brief.briefs
                    WHERE parent_user_id = $1 AND child_id = $2
                      AND week_start = $4 AND opened_at IS NULL
                ) AS missed_last_week
            "#,
        )
        .bind(parent_user_id)
        .bind(child_id)
        .bind(current_week_start)
        .bind(prev_week_start)
        .fetch_one(&self.pool)
        .await?;

        Ok(HistoryFlags {
            has_history: row.get("has_history"),
            missed_last_week: row.get("missed_last_week"),
        })
    }

    async fn upsert_brief(&self, record: &BriefRecord) -> anyhow::Result<SavedBrief> {
        let things = serde_json::to_value(&record.draft.school_things_to_know)?;
        let idea = serde_json::to_value(&record.draft.tiny_connection_idea)?;
        let row = sqlx::query(
            r#"
            INSERT INTO weekly_brief.briefs
            (id, parent_user_id, child_id, week_start, week_end, ux_state, load_score,
             shape_of_the_week, school_things_to_know, moment_to_protect, gentle_heads_up,
             tiny_connection_idea, content_html, content_text, raw_inputs, generated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (parent_user_id, child_id, week_start) DO UPDATE
            SET week_end = EXCLUDED.week_end,
                ux_state = EXCLUDED.ux_state,
                load_score = EXCLUDED.load_score,
                shape_of_the_week = EXCLUDED.shape_of_the_week,
                school_things_to_know = EXCLUDED.school_things_to_know,
                moment_to_protect = EXCLUDED.moment_to_protect,
                gentle_heads_up = EXCLUDED.gentle_heads_up,
                tiny_connection_idea = EXCLUDED.tiny_connection_idea,
                content_html = EXCLUDED.content_html,
                content_text = EXCLUDED.content_text,
                raw_inputs = EXCLUDED.raw_inputs,
                generated_at = EXCLUDED.generated_at
            RETURNING id, generated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(record.parent_user_id)
        .bind(record.child_id)
        .bind(record.week_start)
        .bind(record.week_end)
        .bind(record.ux_state.as_str())
        .bind(record.load_score as i32)
        .bind(&record.draft.shape_of_the_week)
        .bind(things)
        .bind(record.draft.moment_to_protect.as_deref())
        .bind(&record.draft.gentle_heads_up)
        .bind(idea)
        .bind(&record.content_html)
        .bind(&record.content_text)
        .bind(&record.raw_inputs)
        .bind(record.generated_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(SavedBrief {
            id: row.get("id"),
            generated_at: row.get("generated_at"),
        })
    }

    async fn send_notification(
        &self,
        user_id: Uuid,
        title: &str,
        body: &str,
        metadata: serde_json::Value,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO weekly_brief.notifications
            (id, user_id, notification_type, title, body, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind("weekly_brief_ready")
        .bind(title)
        .bind(body)
        .bind(metadata)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let lincoln = Uuid::parse_str("6f1f3a64-0d2e-4a41-9a0d-2f6f9a3f51c1")?;
    let riverside = Uuid::parse_str("b0b8c1de-60c3-4c19-9a6e-4d3fcb2a8e72")?;
    let district = Uuid::parse_str("9a5d2c88-7b14-4f7a-8e2d-1c9f0b6d4e33")?;

    for (id, name) in [(lincoln, "Lincoln Elementary"), (riverside, "Riverside Middle")] {
        sqlx::query(
            r#"
            INSERT INTO weekly_brief.schools (id, organization_id, name)
            VALUES ($1, $2, $3)
            ON CONFLICT (name) DO UPDATE SET organization_id = EXCLUDED.organization_id
            "#,
        )
        .bind(id)
        .bind(district)
        .bind(name)
        .execute(pool)
        .await?;
    }

    let families = [
        (
            "c7a1e3d2-91b4-4f61-a7d8-3e5b2c9f0a14",
            "d4e8f6a1-2c3b-4d5e-9f70-8a1b2c3d4e5f",
            "Maya",
            Some("2016-03-20"),
            lincoln,
        ),
        (
            "a2b4c6d8-e0f1-4234-8567-89ab0cdef123",
            "f1e2d3c4-b5a6-4789-8abc-def012345678",
            "Theo",
            Some("2013-11-02"),
            lincoln,
        ),
        (
            "3c5d7e9f-1a2b-4c4d-8e6f-7a8b9c0d1e2f",
            "5e7f9a1b-3c4d-4e5f-8a7b-9c0d1e2f3a4b",
            "Ines",
            None,
            riverside,
        ),
    ];
    for (parent, child, first_name, birthdate, school_id) in families {
        let birthdate: Option<NaiveDate> = match birthdate {
            Some(raw) => Some(raw.parse()?),
            None => None,
        };
        sqlx::query(
            r#"
            INSERT INTO weekly_brief.roster
            (parent_user_id, child_id, first_name, birthdate, school_id)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (parent_user_id, child_id) DO UPDATE
            SET first_name = EXCLUDED.first_name,
                birthdate = EXCLUDED.birthdate,
                school_id = EXCLUDED.school_id
            "#,
        )
        .bind(Uuid::parse_str(parent)?)
        .bind(Uuid::parse_str(child)?)
        .bind(first_name)
        .bind(birthdate)
        .bind(school_id)
        .execute(pool)
        .await?;
    }

    // Seed signals land in the current week so a run right after `seed` has
    // material to work with.
    let (week_start, _) = resolve_week_range(Utc::now().date_naive());
    let at = |day: i64, hour: u32| {
        Utc.from_utc_datetime(
            &(week_start + Duration::days(day))
                .and_time(NaiveTime::from_hms_opt(hour, 0, 0).unwrap_or(NaiveTime::MIN)),
        )
    };

    let events = [
        ("seed-ev-001", lincoln, "Early dismissal", Some("Half-day for staff development"), at(1, 13)),
        ("seed-ev-002", lincoln, "PTA meeting", None, at(3, 18)),
        ("seed-ev-003", riverside, "No school", Some("District closure"), at(4, 8)),
        ("seed-ev-004", riverside, "Science fair", None, at(2, 9)),
    ];
    for (source_key, school_id, title, description, starts_at) in events {
        sqlx::query(
            r#"
            INSERT INTO weekly_brief.school_events
            (id, school_id, title, description, starts_at, source_key)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(school_id)
        .bind(title)
        .bind(description)
        .bind(starts_at)
        .bind(source_key)
        .execute(pool)
        .await?;
    }

    let announcements = [
        (
            "seed-an-001",
            lincoln,
            "Field trip forms",
            "Permission slip required by Friday for the aquarium trip.",
            at(0, 9),
        ),
        (
            "seed-an-002",
            lincoln,
            "This week at Lincoln",
            "Our weekly update with news and notes from every classroom.",
            at(0, 16),
        ),
        (
            "seed-an-003",
            riverside,
            "Safety drill",
            "A routine lockdown drill is scheduled this week.",
            at(1, 10),
        ),
    ];
    for (source_key, school_id, title, body, created_at) in announcements {
        sqlx::query(
            r#"
            INSERT INTO weekly_brief.announcements
            (id, school_id, title, body, created_at, source_key)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(school_id)
        .bind(title)
        .bind(body)
        .bind(created_at)
        .bind(source_key)
        .execute(pool)
        .await?;
    }

    Ok(())
}
