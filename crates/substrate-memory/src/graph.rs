//! Knowledge-graph queries over `entities`/`relationships`/`memory_entities`.
//!
//! Relationships are asserted, not inferred: [`crate::store`] only links an
//! extracted entity to the memory it came from via `memory_entities`.
//! Recording a typed `subject -predicate-> object` edge goes through
//! [`assert_relationship`] explicitly.

use rusqlite::params;
use substrate_core::error::Result;
use substrate_db::DbPool;

use crate::models::{Entity, Relationship};

/// Finds or creates an entity by `(project_key, name, entity_type)`.
pub fn upsert_entity(pool: &DbPool, project_key: &str, name: &str, entity_type: &str) -> Result<i64> {
    let conn = pool.get()?;
    conn.execute(
        "INSERT OR IGNORE INTO entities (project_key, name, entity_type) VALUES (?1, ?2, ?3)",
        params![project_key, name, entity_type],
    )?;
    let id: i64 = conn.query_row(
        "SELECT id FROM entities WHERE project_key = ?1 AND name = ?2 AND entity_type = ?3",
        params![project_key, name, entity_type],
        |row| row.get(0),
    )?;
    Ok(id)
}

/// Records a `subject -predicate-> object` edge attributed to the memory
/// that asserted it.
pub fn assert_relationship(
    pool: &DbPool,
    subject_entity: i64,
    predicate: &str,
    object_entity: i64,
    confidence: f64,
    memory_id: &str,
) -> Result<i64> {
    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO relationships (subject_entity, predicate, object_entity, confidence, memory_id)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![subject_entity, predicate, object_entity, confidence, memory_id],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_entity(pool: &DbPool, entity_id: i64) -> Result<Entity> {
    let conn = pool.get()?;
    let entity = conn.query_row(
        "SELECT id, project_key, name, entity_type FROM entities WHERE id = ?1",
        params![entity_id],
        |row| {
            Ok(Entity {
                id: row.get(0)?,
                project_key: row.get(1)?,
                name: row.get(2)?,
                entity_type: row.get(3)?,
            })
        },
    )?;
    Ok(entity)
}

/// Finds an entity by exact name, if one exists in the project.
pub fn find_entity_by_name(pool: &DbPool, project_key: &str, name: &str) -> Result<Option<Entity>> {
    use rusqlite::OptionalExtension;
    let conn = pool.get()?;
    let entity = conn
        .query_row(
            "SELECT id, project_key, name, entity_type FROM entities WHERE project_key = ?1 AND name = ?2",
            params![project_key, name],
            |row| {
                Ok(Entity {
                    id: row.get(0)?,
                    project_key: row.get(1)?,
                    name: row.get(2)?,
                    entity_type: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(entity)
}

/// Direct relationships where `entity_id` is the subject, each paired with
/// the object entity it points to.
pub fn outgoing_relationships(pool: &DbPool, entity_id: i64) -> Result<Vec<(Relationship, Entity)>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT r.id, r.subject_entity, r.predicate, r.object_entity, r.confidence, r.memory_id,
                e.id, e.project_key, e.name, e.entity_type
         FROM relationships r JOIN entities e ON e.id = r.object_entity
         WHERE r.subject_entity = ?1",
    )?;
    let rows = stmt
        .query_map(params![entity_id], |row| {
            Ok((
                Relationship {
                    id: row.get(0)?,
                    subject_entity: row.get(1)?,
                    predicate: row.get(2)?,
                    object_entity: row.get(3)?,
                    confidence: row.get(4)?,
                    memory_id: row.get(5)?,
                },
                Entity {
                    id: row.get(6)?,
                    project_key: row.get(7)?,
                    name: row.get(8)?,
                    entity_type: row.get(9)?,
                },
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Memories that mention `entity_id`, most recently created first.
pub fn memories_mentioning(pool: &DbPool, entity_id: i64) -> Result<Vec<String>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT m.id FROM memories m
         JOIN memory_entities me ON me.memory_id = m.id
         WHERE me.entity_id = ?1
         ORDER BY m.created_at DESC",
    )?;
    let ids = stmt
        .query_map(params![entity_id], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids)
}

/// Outgoing links from `memory_id` via `memory_links` (the `related`/
/// `supersedes` edges [`crate::store`] writes), optionally filtered to one
/// `link_type`.
pub fn get_linked_memories(pool: &DbPool, memory_id: &str, link_type: Option<&str>) -> Result<Vec<(String, String)>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT target, link_type FROM memory_links WHERE source = ?1 AND (?2 IS NULL OR link_type = ?2)",
    )?;
    let rows = stmt
        .query_map(params![memory_id, link_type], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Ids of memories that mention an entity matching `name`, optionally
/// narrowed to `entity_type`. Returns an empty list if no such entity
/// exists yet.
pub fn find_by_entity(pool: &DbPool, project_key: &str, name: &str, entity_type: Option<&str>) -> Result<Vec<String>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT id FROM entities WHERE project_key = ?1 AND name = ?2 AND (?3 IS NULL OR entity_type = ?3)",
    )?;
    let entity_ids = stmt
        .query_map(params![project_key, name, entity_type], |row| row.get::<_, i64>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut memory_ids = Vec::new();
    for entity_id in entity_ids {
        memory_ids.extend(memories_mentioning(pool, entity_id)?);
    }
    memory_ids.sort();
    memory_ids.dedup();
    Ok(memory_ids)
}

/// The slice of the knowledge graph attached to one memory: the entities it
/// mentions and the relationships it asserted.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct MemoryKnowledgeGraph {
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
}

pub fn get_knowledge_graph(pool: &DbPool, memory_id: &str) -> Result<MemoryKnowledgeGraph> {
    let conn = pool.get()?;
    let mut entity_stmt = conn.prepare(
        "SELECT e.id, e.project_key, e.name, e.entity_type
         FROM entities e JOIN memory_entities me ON me.entity_id = e.id
         WHERE me.memory_id = ?1",
    )?;
    let entities = entity_stmt
        .query_map(params![memory_id], |row| {
            Ok(Entity { id: row.get(0)?, project_key: row.get(1)?, name: row.get(2)?, entity_type: row.get(3)? })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut rel_stmt = conn.prepare(
        "SELECT id, subject_entity, predicate, object_entity, confidence, memory_id
         FROM relationships WHERE memory_id = ?1",
    )?;
    let relationships = rel_stmt
        .query_map(params![memory_id], |row| {
            Ok(Relationship {
                id: row.get(0)?,
                subject_entity: row.get(1)?,
                predicate: row.get(2)?,
                object_entity: row.get(3)?,
                confidence: row.get(4)?,
                memory_id: row.get(5)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(MemoryKnowledgeGraph { entities, relationships })
}

/// Breadth-first traversal outward from `entity_id` up to `max_hops`,
/// following relationship edges in either direction. Returns the set of
/// entity ids reached, excluding the starting entity.
pub fn neighborhood(pool: &DbPool, entity_id: i64, max_hops: u32) -> Result<Vec<i64>> {
    let conn = pool.get()?;
    let mut visited = std::collections::HashSet::new();
    visited.insert(entity_id);
    let mut frontier = vec![entity_id];

    for _ in 0..max_hops {
        if frontier.is_empty() {
            break;
        }
        let mut next_frontier = Vec::new();
        for &current in &frontier {
            let mut stmt = conn.prepare(
                "SELECT object_entity FROM relationships WHERE subject_entity = ?1
                 UNION
                 SELECT subject_entity FROM relationships WHERE object_entity = ?1",
            )?;
            let neighbors = stmt
                .query_map(params![current], |row| row.get::<_, i64>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            for neighbor in neighbors {
                if visited.insert(neighbor) {
                    next_frontier.push(neighbor);
                }
            }
        }
        frontier = next_frontier;
    }

    visited.remove(&entity_id);
    Ok(visited.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use substrate_db::PoolRegistry;

    fn setup() -> (DbPool, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let registry = PoolRegistry::new(PathBuf::from(tmp.path()));
        let pool = registry.pool_for("proj").unwrap();
        (pool, tmp)
    }

    #[test]
    fn upsert_entity_is_idempotent() {
        let (pool, _tmp) = setup();
        let first = upsert_entity(&pool, "proj", "Alice", "person").unwrap();
        let second = upsert_entity(&pool, "proj", "Alice", "person").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn assert_relationship_and_traverse_outgoing() {
        let (pool, _tmp) = setup();
        let alice = upsert_entity(&pool, "proj", "Alice", "person").unwrap();
        let bob = upsert_entity(&pool, "proj", "Bob", "person").unwrap();
        assert_relationship(&pool, alice, "reports_to", bob, 0.9, "mem-1").unwrap();

        let outgoing = outgoing_relationships(&pool, alice).unwrap();
        assert_eq!(outgoing.len(), 1);
        assert_eq!(outgoing[0].0.predicate, "reports_to");
        assert_eq!(outgoing[0].1.name, "Bob");
    }

    #[test]
    fn neighborhood_expands_with_hop_count() {
        let (pool, _tmp) = setup();
        let a = upsert_entity(&pool, "proj", "A", "concept").unwrap();
        let b = upsert_entity(&pool, "proj", "B", "concept").unwrap();
        let c = upsert_entity(&pool, "proj", "C", "concept").unwrap();
        assert_relationship(&pool, a, "links_to", b, 0.8, "mem-1").unwrap();
        assert_relationship(&pool, b, "links_to", c, 0.8, "mem-2").unwrap();

        let one_hop = neighborhood(&pool, a, 1).unwrap();
        assert_eq!(one_hop, vec![b]);

        let mut two_hop = neighborhood(&pool, a, 2).unwrap();
        two_hop.sort_unstable();
        let mut expected = vec![b, c];
        expected.sort_unstable();
        assert_eq!(two_hop, expected);
    }

    #[test]
    fn find_entity_by_name_returns_none_when_absent() {
        let (pool, _tmp) = setup();
        assert!(find_entity_by_name(&pool, "proj", "Nobody").unwrap().is_none());
    }

    #[test]
    fn find_by_entity_collects_mentioning_memories() {
        let (pool, _tmp) = setup();
        let alice = upsert_entity(&pool, "proj", "Alice", "person").unwrap();
        let conn = pool.get().unwrap();
        conn.execute(
            "INSERT INTO memories (id, project_key, content, created_at, updated_at) VALUES ('mem-1', 'proj', 'x', '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
            [],
        ).unwrap();
        conn.execute("INSERT INTO memory_entities (memory_id, entity_id) VALUES ('mem-1', ?1)", params![alice]).unwrap();
        drop(conn);

        let found = find_by_entity(&pool, "proj", "Alice", None).unwrap();
        assert_eq!(found, vec!["mem-1".to_string()]);
        assert!(find_by_entity(&pool, "proj", "Alice", Some("organization")).unwrap().is_empty());
    }

    #[test]
    fn get_knowledge_graph_returns_entities_and_relationships_for_a_memory() {
        let (pool, _tmp) = setup();
        let alice = upsert_entity(&pool, "proj", "Alice", "person").unwrap();
        let bob = upsert_entity(&pool, "proj", "Bob", "person").unwrap();
        assert_relationship(&pool, alice, "reports_to", bob, 0.9, "mem-1").unwrap();
        {
            let conn = pool.get().unwrap();
            conn.execute("INSERT INTO memory_entities (memory_id, entity_id) VALUES ('mem-1', ?1)", params![alice]).unwrap();
        }

        let graph = get_knowledge_graph(&pool, "mem-1").unwrap();
        assert_eq!(graph.entities.len(), 1);
        assert_eq!(graph.relationships.len(), 1);
        assert_eq!(graph.relationships[0].predicate, "reports_to");
    }

    #[test]
    fn get_linked_memories_returns_outgoing_edges_only() {
        let (pool, _tmp) = setup();
        let conn = pool.get().unwrap();
        for id in ["mem-1", "mem-2"] {
            conn.execute(
                "INSERT INTO memories (id, project_key, content, created_at, updated_at) VALUES (?1, 'proj', 'x', '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
                params![id],
            ).unwrap();
        }
        conn.execute(
            "INSERT INTO memory_links (source, target, link_type, strength) VALUES ('mem-1', 'mem-2', 'related', 0.8)",
            [],
        ).unwrap();
        drop(conn);

        assert_eq!(get_linked_memories(&pool, "mem-1", None).unwrap(), vec![("mem-2".to_string(), "related".to_string())]);
        assert!(get_linked_memories(&pool, "mem-2", None).unwrap().is_empty());
    }
}
