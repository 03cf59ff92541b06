//! Rank and percentile for submitted attempts.
//!
//! Every submission re-sorts the whole submitted population of its exam; there
//! is no incremental index. Two submissions landing at the same moment can each
//! persist a rank computed before the other one was visible, so standings are
//! eventually consistent rather than a strict total order. The ranking retry
//! sweep converges them.

use std::cmp::Ordering;

use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::RankingRow;
use crate::repositories;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RankingEntry {
    pub(crate) attempt_id: String,
    pub(crate) user_id: String,
    pub(crate) total_score: f64,
    pub(crate) percentage: Option<i32>,
    pub(crate) submitted_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Standing {
    pub(crate) rank: i32,
    pub(crate) percentile: i32,
    pub(crate) population: i32,
}

impl From<RankingRow> for RankingEntry {
    fn from(row: RankingRow) -> Self {
        Self {
            attempt_id: row.id,
            user_id: row.user_id,
            total_score: row.total_score,
            percentage: row.percentage,
            submitted_at: row.submitted_at,
        }
    }
}

/// Highest score first, earlier submission wins ties. The attempt id is the
/// last resort so the order is total.
pub(crate) fn order(entries: &mut [RankingEntry]) {
    entries.sort_by(compare);
}

fn compare(left: &RankingEntry, right: &RankingEntry) -> Ordering {
    right
        .total_score
        .total_cmp(&left.total_score)
        .then_with(|| left.submitted_at.cmp(&right.submitted_at))
        .then_with(|| left.attempt_id.cmp(&right.attempt_id))
}

/// `round((N - rank + 1) / N * 100)`.
pub(crate) fn percentile(rank: i32, population: i32) -> i32 {
    if population <= 0 || rank <= 0 {
        return 0;
    }
    let above = f64::from(population - rank + 1);
    (above / f64::from(population) * 100.0).round() as i32
}

/// Position of `attempt_id` in an already ordered population.
pub(crate) fn standing_of(ordered: &[RankingEntry], attempt_id: &str) -> Option<Standing> {
    let population = i32::try_from(ordered.len()).ok()?;
    let index = ordered.iter().position(|entry| entry.attempt_id == attempt_id)?;
    let rank = i32::try_from(index + 1).ok()?;
    Some(Standing { rank, percentile: percentile(rank, population), population })
}

/// Loads the exam's submitted attempts, ranks them and stores the standing
/// of `attempt_id`. Returns `None` if the attempt is not (yet) submitted.
pub(crate) async fn compute_rank_and_percentile(
    pool: &PgPool,
    exam_id: &str,
    attempt_id: &str,
) -> Result<Option<Standing>, sqlx::Error> {
    let ordered = load_ordered(pool, exam_id).await?;
    let Some(standing) = standing_of(&ordered, attempt_id) else {
        return Ok(None);
    };

    repositories::attempts::set_ranking(pool, attempt_id, standing.rank, standing.percentile)
        .await?;

    tracing::debug!(
        exam_id,
        attempt_id,
        rank = standing.rank,
        percentile = standing.percentile,
        population = standing.population,
        "Attempt ranked"
    );

    Ok(Some(standing))
}

pub(crate) async fn load_ordered(
    pool: &PgPool,
    exam_id: &str,
) -> Result<Vec<RankingEntry>, sqlx::Error> {
    let rows = repositories::attempts::list_submitted_for_ranking(pool, exam_id).await?;
    let mut entries: Vec<RankingEntry> = rows.into_iter().map(RankingEntry::from).collect();
    order(&mut entries);
    Ok(entries)
}
