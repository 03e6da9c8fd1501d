//! Deduplicating merge of extracted skills into a user's skill set.
//!
//! Re-extraction from the same document replaces that document's prior
//! contribution. Existing skills are fetched in one batched query and merged
//! by exact name; `experience_years` only ever rises (best-known value), and
//! a raised row is reattributed to the new source document.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::skill::UserSkillRow;
use crate::skills::extraction::ExtractedSkill;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Newly inserted rows (updates are not counted).
    pub added: usize,
    pub updated: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedUpdate {
    pub id: Uuid,
    pub experience_years: f64,
}

#[derive(Debug, Clone, Default)]
pub struct MergePlan {
    pub inserts: Vec<ExtractedSkill>,
    pub updates: Vec<PlannedUpdate>,
}

/// Computes the merge against a name-keyed snapshot of existing rows.
///
/// Duplicate names inside the batch collapse to one insert carrying the
/// highest experience value. An existing row is only touched when the
/// incoming experience is present and strictly greater than the stored one.
pub fn plan_merge(
    existing: &HashMap<String, UserSkillRow>,
    incoming: &[ExtractedSkill],
) -> MergePlan {
    let mut inserts: Vec<ExtractedSkill> = Vec::new();
    let mut insert_index: HashMap<String, usize> = HashMap::new();
    let mut updates: HashMap<Uuid, f64> = HashMap::new();

    for skill in incoming {
        if let Some(row) = existing.get(&skill.skill_name) {
            let Some(incoming_years) = skill.experience_years else {
                continue;
            };
            let current_best = updates
                .get(&row.id)
                .copied()
                .or(row.experience_years);
            if current_best.map_or(true, |best| incoming_years > best) {
                updates.insert(row.id, incoming_years);
            }
        } else if let Some(&slot) = insert_index.get(&skill.skill_name) {
            // Second occurrence of the same name in one batch.
            if let Some(incoming_years) = skill.experience_years {
                let pending = &mut inserts[slot];
                if pending.experience_years.map_or(true, |best| incoming_years > best) {
                    pending.experience_years = Some(incoming_years);
                }
            }
        } else {
            insert_index.insert(skill.skill_name.clone(), inserts.len());
            inserts.push(skill.clone());
        }
    }

    MergePlan {
        inserts,
        updates: updates
            .into_iter()
            .map(|(id, experience_years)| PlannedUpdate {
                id,
                experience_years,
            })
            .collect(),
    }
}

/// Merges one document's extraction batch for a user. Runs as a single
/// transaction; a failure anywhere leaves the skill set untouched.
pub async fn merge_skills(
    pool: &PgPool,
    user_id: Uuid,
    extracted: &[ExtractedSkill],
    source_document_id: Uuid,
    now: DateTime<Utc>,
) -> Result<MergeOutcome, AppError> {
    let mut tx = pool.begin().await?;

    // This document's previous contribution is replaced, not appended to.
    sqlx::query("DELETE FROM user_skills WHERE user_id = $1 AND source_document_id = $2")
        .bind(user_id)
        .bind(source_document_id)
        .execute(&mut *tx)
        .await?;

    // One batched lookup for every incoming name instead of a query per
    // skill; extraction batches run to hundreds of entries.
    let names: Vec<String> = extracted.iter().map(|s| s.skill_name.clone()).collect();
    let rows: Vec<UserSkillRow> = sqlx::query_as(
        "SELECT * FROM user_skills WHERE user_id = $1 AND skill_name = ANY($2)",
    )
    .bind(user_id)
    .bind(&names)
    .fetch_all(&mut *tx)
    .await?;

    let existing: HashMap<String, UserSkillRow> = rows
        .into_iter()
        .map(|row| (row.skill_name.clone(), row))
        .collect();

    let plan = plan_merge(&existing, extracted);

    for update in &plan.updates {
        sqlx::query(
            "UPDATE user_skills SET experience_years = $2, source_document_id = $3, updated_at = $4 \
             WHERE id = $1",
        )
        .bind(update.id)
        .bind(update.experience_years)
        .bind(source_document_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    for skill in &plan.inserts {
        sqlx::query(
            "INSERT INTO user_skills \
               (user_id, skill_name, skill_category, experience_years, source_document_id, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $6)",
        )
        .bind(user_id)
        .bind(&skill.skill_name)
        .bind(&skill.skill_category)
        .bind(skill.experience_years)
        .bind(source_document_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    let outcome = MergeOutcome {
        added: plan.inserts.len(),
        updated: plan.updates.len(),
    };
    tracing::info!(
        %user_id,
        %source_document_id,
        added = outcome.added,
        updated = outcome.updated,
        "skill merge committed"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_skill(name: &str, years: Option<f64>) -> ExtractedSkill {
        ExtractedSkill {
            skill_name: name.to_string(),
            skill_category: "technical".to_string(),
            experience_years: years,
        }
    }

    fn make_row(name: &str, years: Option<f64>) -> UserSkillRow {
        UserSkillRow {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            skill_name: name.to_string(),
            skill_category: "technical".to_string(),
            experience_years: years,
            source_document_id: Some(Uuid::new_v4()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn existing_map(rows: Vec<UserSkillRow>) -> HashMap<String, UserSkillRow> {
        rows.into_iter()
            .map(|row| (row.skill_name.clone(), row))
            .collect()
    }

    #[test]
    fn test_all_new_skills_are_inserts() {
        let plan = plan_merge(
            &HashMap::new(),
            &[make_skill("Python", Some(2.0)), make_skill("Git", None)],
        );
        assert_eq!(plan.inserts.len(), 2);
        assert!(plan.updates.is_empty());
    }

    #[test]
    fn test_higher_experience_raises_existing_row() {
        let row = make_row("Python", Some(2.0));
        let row_id = row.id;
        let plan = plan_merge(&existing_map(vec![row]), &[make_skill("Python", Some(5.0))]);

        assert!(plan.inserts.is_empty());
        assert_eq!(
            plan.updates,
            vec![PlannedUpdate {
                id: row_id,
                experience_years: 5.0
            }]
        );
    }

    #[test]
    fn test_lower_experience_never_downgrades() {
        let existing = existing_map(vec![make_row("Python", Some(5.0))]);
        let plan = plan_merge(&existing, &[make_skill("Python", Some(2.0))]);
        assert!(plan.inserts.is_empty());
        assert!(plan.updates.is_empty());
    }

    #[test]
    fn test_equal_experience_is_not_an_update() {
        let existing = existing_map(vec![make_row("Python", Some(5.0))]);
        let plan = plan_merge(&existing, &[make_skill("Python", Some(5.0))]);
        assert!(plan.updates.is_empty());
    }

    #[test]
    fn test_missing_incoming_experience_never_updates() {
        let existing = existing_map(vec![make_row("Python", Some(2.0))]);
        let plan = plan_merge(&existing, &[make_skill("Python", None)]);
        assert!(plan.updates.is_empty());
    }

    #[test]
    fn test_null_stored_experience_accepts_any_value() {
        let row = make_row("Python", None);
        let row_id = row.id;
        let plan = plan_merge(&existing_map(vec![row]), &[make_skill("Python", Some(1.0))]);
        assert_eq!(
            plan.updates,
            vec![PlannedUpdate {
                id: row_id,
                experience_years: 1.0
            }]
        );
    }

    #[test]
    fn test_names_match_case_sensitively() {
        let existing = existing_map(vec![make_row("Python", Some(2.0))]);
        let plan = plan_merge(&existing, &[make_skill("python", Some(5.0))]);
        // "python" is a different skill from "Python" in the baseline.
        assert_eq!(plan.inserts.len(), 1);
        assert!(plan.updates.is_empty());
    }

    #[test]
    fn test_duplicate_names_in_batch_collapse_to_best() {
        let plan = plan_merge(
            &HashMap::new(),
            &[
                make_skill("Python", Some(2.0)),
                make_skill("Python", Some(4.0)),
                make_skill("Python", Some(3.0)),
            ],
        );
        assert_eq!(plan.inserts.len(), 1);
        assert_eq!(plan.inserts[0].experience_years, Some(4.0));
    }

    #[test]
    fn test_remerge_of_same_batch_is_stable() {
        // First merge inserts everything; replaying the batch against the
        // resulting rows plans no inserts and no updates.
        let batch = [make_skill("Python", Some(2.0)), make_skill("Git", Some(1.0))];
        let first = plan_merge(&HashMap::new(), &batch);
        assert_eq!(first.inserts.len(), 2);

        let rows = first
            .inserts
            .iter()
            .map(|s| make_row(&s.skill_name, s.experience_years))
            .collect();
        let second = plan_merge(&existing_map(rows), &batch);
        assert!(second.inserts.is_empty());
        assert!(second.updates.is_empty());
    }

    #[test]
    fn test_reextraction_scenario_raises_and_counts_zero_added() {
        // Python@2 merged, then Python@5 from a different document: the row
        // is raised to 5 and nothing counts as added.
        let existing = existing_map(vec![make_row("Python", Some(2.0))]);
        let plan = plan_merge(&existing, &[make_skill("Python", Some(5.0))]);
        assert_eq!(plan.inserts.len(), 0);
        assert_eq!(plan.updates.len(), 1);
        assert_eq!(plan.updates[0].experience_years, 5.0);
    }

    #[test]
    fn test_large_batch_plans_without_quadratic_lookup() {
        // 500 existing + 500 incoming names, half overlapping: the planner
        // works off the prefetched map alone.
        let rows: Vec<UserSkillRow> = (0..500)
            .map(|i| make_row(&format!("Skill {i}"), Some(1.0)))
            .collect();
        let existing = existing_map(rows);
        let incoming: Vec<ExtractedSkill> = (250..750)
            .map(|i| make_skill(&format!("Skill {i}"), Some(2.0)))
            .collect();

        let plan = plan_merge(&existing, &incoming);
        assert_eq!(plan.inserts.len(), 250);
        assert_eq!(plan.updates.len(), 250);
    }
}
