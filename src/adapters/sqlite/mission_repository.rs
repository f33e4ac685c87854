//! SQLite implementation of the MissionRepository (relational projection).

use async_trait::async_trait;
use sqlx::{Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use super::{parse_datetime, parse_optional_datetime, parse_phase, parse_uuid};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    ArtifactRow, ConceptRow, ConcernRow, MissionRecord, MissionRow, NarrativeRow,
    ProjectionCounts, QualityGateRow, SubState, ToolCallRow, TrajectoryRow,
};
use crate::domain::ports::MissionRepository;

#[derive(Clone)]
pub struct SqliteMissionRepository {
    pool: SqlitePool,
}

impl SqliteMissionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn replace_children(
        tx: &mut Transaction<'_, Sqlite>,
        mission_id: &str,
        record: &MissionRecord,
    ) -> DomainResult<()> {
        for table in [
            "tool_calls",
            "session_narrative",
            "domain_concepts",
            "domain_concerns",
            "trajectory",
            "artifacts",
            "quality_gates",
        ] {
            sqlx::query(&format!("DELETE FROM {table} WHERE mission_id = ?"))
                .bind(mission_id)
                .execute(&mut **tx)
                .await?;
        }

        for call in &record.tool_calls {
            sqlx::query(
                "INSERT INTO tool_calls (mission_id, position, tool_name, input, output, called_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(mission_id)
            .bind(call.position)
            .bind(&call.tool_name)
            .bind(&call.input)
            .bind(&call.output)
            .bind(call.called_at.to_rfc3339())
            .execute(&mut **tx)
            .await?;
        }

        for entry in &record.narrative {
            sqlx::query(
                "INSERT INTO session_narrative (mission_id, position, phase, entry, recorded_at)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(mission_id)
            .bind(entry.position)
            .bind(entry.phase.as_str())
            .bind(&entry.entry)
            .bind(entry.recorded_at.to_rfc3339())
            .execute(&mut **tx)
            .await?;
        }

        for concept in &record.concepts {
            sqlx::query("INSERT INTO domain_concepts (mission_id, position, concept) VALUES (?, ?, ?)")
                .bind(mission_id)
                .bind(concept.position)
                .bind(&concept.concept)
                .execute(&mut **tx)
                .await?;
        }

        for concern in &record.concerns {
            sqlx::query(
                "INSERT INTO domain_concerns (mission_id, position, concern, severity) VALUES (?, ?, ?, ?)",
            )
            .bind(mission_id)
            .bind(concern.position)
            .bind(&concern.concern)
            .bind(&concern.severity)
            .execute(&mut **tx)
            .await?;
        }

        if let Some(trajectory) = &record.trajectory {
            sqlx::query(
                "INSERT INTO trajectory (mission_id, repair_cycles, last_transition_from,
                 last_transition_to, last_transition_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(mission_id)
            .bind(trajectory.repair_cycles)
            .bind(trajectory.last_transition_from.map(|p| p.as_str()))
            .bind(trajectory.last_transition_to.map(|p| p.as_str()))
            .bind(trajectory.last_transition_at.map(|t| t.to_rfc3339()))
            .execute(&mut **tx)
            .await?;
        }

        for artifact in &record.artifacts {
            sqlx::query("INSERT INTO artifacts (mission_id, name, location) VALUES (?, ?, ?)")
                .bind(mission_id)
                .bind(&artifact.name)
                .bind(&artifact.location)
                .execute(&mut **tx)
                .await?;
        }

        for gate in &record.quality_gates {
            sqlx::query(
                "INSERT INTO quality_gates (mission_id, position, gate_id, blocking, passed,
                 from_phase, to_phase, detail, checked_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(mission_id)
            .bind(gate.position)
            .bind(&gate.gate_id)
            .bind(gate.blocking)
            .bind(gate.passed)
            .bind(gate.from_phase.as_str())
            .bind(gate.to_phase.as_str())
            .bind(&gate.detail)
            .bind(gate.checked_at.to_rfc3339())
            .execute(&mut **tx)
            .await?;
        }

        Ok(())
    }

    async fn load_children(&self, mission: MissionRow) -> DomainResult<MissionRecord> {
        let id = mission.id.to_string();

        let tool_calls = sqlx::query_as::<_, ToolCallDbRow>(
            "SELECT position, tool_name, input, output, called_at FROM tool_calls
             WHERE mission_id = ? ORDER BY position",
        )
        .bind(&id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(TryInto::try_into)
        .collect::<DomainResult<Vec<ToolCallRow>>>()?;

        let narrative = sqlx::query_as::<_, NarrativeDbRow>(
            "SELECT position, phase, entry, recorded_at FROM session_narrative
             WHERE mission_id = ? ORDER BY position",
        )
        .bind(&id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(TryInto::try_into)
        .collect::<DomainResult<Vec<NarrativeRow>>>()?;

        let concepts = sqlx::query_as::<_, (i64, String)>(
            "SELECT position, concept FROM domain_concepts WHERE mission_id = ? ORDER BY position",
        )
        .bind(&id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|(position, concept)| ConceptRow { position, concept })
        .collect();

        let concerns = sqlx::query_as::<_, (i64, String, String)>(
            "SELECT position, concern, severity FROM domain_concerns
             WHERE mission_id = ? ORDER BY position",
        )
        .bind(&id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|(position, concern, severity)| ConcernRow {
            position,
            concern,
            severity,
        })
        .collect();

        let trajectory = sqlx::query_as::<_, TrajectoryDbRow>(
            "SELECT repair_cycles, last_transition_from, last_transition_to, last_transition_at
             FROM trajectory WHERE mission_id = ?",
        )
        .bind(&id)
        .fetch_optional(&self.pool)
        .await?
        .map(TryInto::try_into)
        .transpose()?;

        let artifacts = sqlx::query_as::<_, (String, String)>(
            "SELECT name, location FROM artifacts WHERE mission_id = ? ORDER BY name",
        )
        .bind(&id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|(name, location)| ArtifactRow { name, location })
        .collect();

        let quality_gates = sqlx::query_as::<_, QualityGateDbRow>(
            "SELECT position, gate_id, blocking, passed, from_phase, to_phase, detail, checked_at
             FROM quality_gates WHERE mission_id = ? ORDER BY position",
        )
        .bind(&id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(TryInto::try_into)
        .collect::<DomainResult<Vec<QualityGateRow>>>()?;

        Ok(MissionRecord {
            mission,
            tool_calls,
            narrative,
            concepts,
            concerns,
            trajectory,
            artifacts,
            quality_gates,
        })
    }
}

#[async_trait]
impl MissionRepository for SqliteMissionRepository {
    async fn upsert(&self, record: &MissionRecord) -> DomainResult<Uuid> {
        let m = &record.mission;
        let mut tx = self.pool.begin().await?;

        let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM missions WHERE external_id = ?")
            .bind(m.external_id.to_string())
            .fetch_optional(&mut *tx)
            .await?;
        let mission_id = match existing {
            Some((id,)) => parse_uuid(&id)?,
            None => m.id,
        };
        let id = mission_id.to_string();

        sqlx::query(
            r#"INSERT INTO missions (id, external_id, current_phase, current_sub_state,
               budget_max_cost, budget_current_cost, budget_alert_threshold, owner, revision,
               created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(external_id) DO UPDATE SET
                   current_phase = excluded.current_phase,
                   current_sub_state = excluded.current_sub_state,
                   budget_max_cost = excluded.budget_max_cost,
                   budget_current_cost = excluded.budget_current_cost,
                   budget_alert_threshold = excluded.budget_alert_threshold,
                   owner = excluded.owner,
                   revision = excluded.revision,
                   created_at = excluded.created_at,
                   updated_at = excluded.updated_at"#,
        )
        .bind(&id)
        .bind(m.external_id.to_string())
        .bind(m.current_phase.as_str())
        .bind(m.current_sub_state.map(|s| s.as_str()))
        .bind(m.budget_max_cost)
        .bind(m.budget_current_cost)
        .bind(m.budget_alert_threshold)
        .bind(&m.owner)
        .bind(m.revision)
        .bind(m.created_at.to_rfc3339())
        .bind(m.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        Self::replace_children(&mut tx, &id, record).await?;
        tx.commit().await?;
        Ok(mission_id)
    }

    async fn find_by_external_id(&self, external_id: Uuid) -> DomainResult<Option<MissionRecord>> {
        let row: Option<MissionDbRow> = sqlx::query_as("SELECT * FROM missions WHERE external_id = ?")
            .bind(external_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => Ok(Some(self.load_children(r.try_into()?).await?)),
            None => Ok(None),
        }
    }

    async fn list_external_ids(&self) -> DomainResult<Vec<Uuid>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT external_id FROM missions ORDER BY external_id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(|(id,)| parse_uuid(id)).collect()
    }

    async fn counts(&self) -> DomainResult<ProjectionCounts> {
        let count = |table: &'static str| {
            let pool = self.pool.clone();
            async move {
                let (n,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
                    .fetch_one(&pool)
                    .await?;
                Ok::<_, DomainError>(n)
            }
        };
        Ok(ProjectionCounts {
            missions: count("missions").await?,
            tool_calls: count("tool_calls").await?,
            narrative: count("session_narrative").await?,
            concepts: count("domain_concepts").await?,
            concerns: count("domain_concerns").await?,
            trajectory: count("trajectory").await?,
            artifacts: count("artifacts").await?,
            quality_gates: count("quality_gates").await?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MissionDbRow {
    id: String,
    external_id: String,
    current_phase: String,
    current_sub_state: Option<String>,
    budget_max_cost: f64,
    budget_current_cost: f64,
    budget_alert_threshold: f64,
    owner: String,
    revision: i64,
    created_at: String,
    updated_at: String,
}

impl TryFrom<MissionDbRow> for MissionRow {
    type Error = DomainError;

    fn try_from(row: MissionDbRow) -> Result<Self, Self::Error> {
        let current_sub_state = row
            .current_sub_state
            .map(|s| {
                SubState::parse_str(&s)
                    .ok_or_else(|| DomainError::SerializationError(format!("Invalid sub-state: {s}")))
            })
            .transpose()?;

        Ok(MissionRow {
            id: parse_uuid(&row.id)?,
            external_id: parse_uuid(&row.external_id)?,
            current_phase: parse_phase(&row.current_phase)?,
            current_sub_state,
            budget_max_cost: row.budget_max_cost,
            budget_current_cost: row.budget_current_cost,
            budget_alert_threshold: row.budget_alert_threshold,
            owner: row.owner,
            revision: row.revision,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ToolCallDbRow {
    position: i64,
    tool_name: String,
    input: Option<String>,
    output: Option<String>,
    called_at: String,
}

impl TryFrom<ToolCallDbRow> for ToolCallRow {
    type Error = DomainError;

    fn try_from(row: ToolCallDbRow) -> Result<Self, Self::Error> {
        Ok(ToolCallRow {
            position: row.position,
            tool_name: row.tool_name,
            input: row.input,
            output: row.output,
            called_at: parse_datetime(&row.called_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct NarrativeDbRow {
    position: i64,
    phase: String,
    entry: String,
    recorded_at: String,
}

impl TryFrom<NarrativeDbRow> for NarrativeRow {
    type Error = DomainError;

    fn try_from(row: NarrativeDbRow) -> Result<Self, Self::Error> {
        Ok(NarrativeRow {
            position: row.position,
            phase: parse_phase(&row.phase)?,
            entry: row.entry,
            recorded_at: parse_datetime(&row.recorded_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TrajectoryDbRow {
    repair_cycles: i64,
    last_transition_from: Option<String>,
    last_transition_to: Option<String>,
    last_transition_at: Option<String>,
}

impl TryFrom<TrajectoryDbRow> for TrajectoryRow {
    type Error = DomainError;

    fn try_from(row: TrajectoryDbRow) -> Result<Self, Self::Error> {
        Ok(TrajectoryRow {
            repair_cycles: row.repair_cycles,
            last_transition_from: row.last_transition_from.as_deref().map(parse_phase).transpose()?,
            last_transition_to: row.last_transition_to.as_deref().map(parse_phase).transpose()?,
            last_transition_at: parse_optional_datetime(row.last_transition_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct QualityGateDbRow {
    position: i64,
    gate_id: String,
    blocking: bool,
    passed: bool,
    from_phase: String,
    to_phase: String,
    detail: Option<String>,
    checked_at: String,
}

impl TryFrom<QualityGateDbRow> for QualityGateRow {
    type Error = DomainError;

    fn try_from(row: QualityGateDbRow) -> Result<Self, Self::Error> {
        Ok(QualityGateRow {
            position: row.position,
            gate_id: row.gate_id,
            blocking: row.blocking,
            passed: row.passed,
            from_phase: parse_phase(&row.from_phase)?,
            to_phase: parse_phase(&row.to_phase)?,
            detail: row.detail,
            checked_at: parse_datetime(&row.checked_at)?,
        })
    }
}
