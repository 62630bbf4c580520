// JobFilter -> SQL predicate
//
// Mirrors `JobFilter::matches` so the database selects exactly the jobs the
// in-memory predicate would accept.

use gearflow_core::domain::{JobFilter, QueueLists};
use sqlx::{QueryBuilder, Sqlite};

/// Append `(?, ?, ...)` binding every value
pub(crate) fn push_list(qb: &mut QueryBuilder<'_, Sqlite>, values: &[String]) {
    qb.push("(");
    let mut list = qb.separated(", ");
    for value in values {
        list.push_bind(value.clone());
    }
    list.push_unseparated(")");
}

/// Whitelist / blacklist on a nullable scalar column
fn push_scalar(qb: &mut QueryBuilder<'_, Sqlite>, column: &str, white: &[String], black: &[String]) {
    if !white.is_empty() {
        qb.push(format!(" AND {} IN ", column));
        push_list(qb, white);
    }
    if !black.is_empty() {
        qb.push(format!(" AND ({} IS NULL OR {} NOT IN ", column, column));
        push_list(qb, black);
        qb.push(")");
    }
}

/// Append ` AND ...` clauses for `filter` against table alias `alias`
pub(crate) fn push_job_filter(qb: &mut QueryBuilder<'_, Sqlite>, alias: &str, filter: &JobFilter) {
    let QueueLists {
        group,
        gear_name,
        tag,
        compute_provider,
        created_by,
    } = &filter.whitelist;
    let black = &filter.blacklist;

    push_scalar(qb, &format!("{}.group_id", alias), group, &black.group);
    push_scalar(qb, &format!("{}.gear_name", alias), gear_name, &black.gear_name);
    push_scalar(
        qb,
        &format!("{}.compute_provider_id", alias),
        compute_provider,
        &black.compute_provider,
    );
    push_scalar(qb, &format!("{}.origin_id", alias), created_by, &black.created_by);

    if !tag.is_empty() {
        qb.push(format!(
            " AND EXISTS (SELECT 1 FROM json_each({}.tags) AS t WHERE t.value IN ",
            alias
        ));
        push_list(qb, tag);
        qb.push(")");
    }
    if !black.tag.is_empty() {
        qb.push(format!(
            " AND NOT EXISTS (SELECT 1 FROM json_each({}.tags) AS t WHERE t.value IN ",
            alias
        ));
        push_list(qb, &black.tag);
        qb.push(")");
    }

    // Every gear capability must be offered by the caller
    qb.push(format!(
        " AND NOT EXISTS (SELECT 1 FROM json_each({}.capabilities) AS c",
        alias
    ));
    if !filter.capabilities.is_empty() {
        qb.push(" WHERE c.value NOT IN ");
        push_list(qb, &filter.capabilities);
    }
    qb.push(")");
}
