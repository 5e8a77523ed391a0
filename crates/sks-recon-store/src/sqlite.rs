//! SQLite implementation of the PrefixTree trait.
//!
//! Each node is one row keyed by its bit path; sample values and leaf
//! elements are CBOR arrays of fixed-width element bytes. rusqlite with
//! bundled SQLite, wrapped in async via tokio::spawn_blocking. Every
//! mutation runs in a single transaction.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ciborium::Value;
use rusqlite::{params, Connection, OptionalExtension};
use sks_recon_core::{p_sks, zpoints, Bitstring, Zp};

use crate::config::PTreeConfig;
use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{
    add_element_array, child_key, del_element_array, next_child, update_svalues, PrefixNode,
    PrefixTree,
};

/// SQLite-backed prefix tree.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqlitePrefixTree {
    geometry: Arc<Geometry>,
    conn: Arc<Mutex<Connection>>,
}

struct Geometry {
    config: PTreeConfig,
    points: Vec<Zp>,
}

/// A node as stored.
struct NodeRow {
    key: Bitstring,
    svalues: Vec<Zp>,
    size: usize,
    leaf: bool,
    elements: Vec<Zp>,
}

impl NodeRow {
    fn empty(key: Bitstring, points: &[Zp]) -> Self {
        Self {
            key,
            svalues: points.iter().map(|p| Zp::one(p.modulus())).collect(),
            size: 0,
            leaf: true,
            elements: Vec::new(),
        }
    }

    fn snapshot(self) -> PrefixNode {
        PrefixNode {
            key: self.key,
            svalues: self.svalues,
            size: self.size,
            leaf: self.leaf,
        }
    }
}

impl SqlitePrefixTree {
    /// Open a tree database at the given path.
    ///
    /// Creates the file, schema and root node if they don't exist. Fails if
    /// the stored geometry differs from `config`.
    pub fn open(path: impl AsRef<Path>, config: PTreeConfig) -> Result<Self> {
        Self::with_connection(Connection::open(path)?, config)
    }

    /// Open an in-memory tree database.
    pub fn open_memory(config: PTreeConfig) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, config)
    }

    fn with_connection(mut conn: Connection, config: PTreeConfig) -> Result<Self> {
        migration::migrate(&mut conn)?;
        let geometry = Geometry {
            config,
            points: zpoints(&p_sks(), config.num_samples()),
        };
        ensure_root(&conn, &geometry)?;
        Ok(Self {
            geometry: Arc::new(geometry),
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a blocking operation on the connection.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection, &Geometry) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let geometry = Arc::clone(&self.geometry);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|e| {
                StoreError::Database(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
                    Some(format!("mutex poisoned: {}", e)),
                ))
            })?;
            f(&mut conn, &geometry)
        })
        .await
        .map_err(|e| {
            StoreError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
                Some(format!("spawn_blocking failed: {}", e)),
            ))
        })?
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row encoding
// ─────────────────────────────────────────────────────────────────────────────

fn encode_zps(zs: &[Zp]) -> Result<Vec<u8>> {
    let values: Vec<Value> = zs.iter().map(|z| Value::Bytes(z.to_padded_bytes())).collect();
    let mut buf = Vec::new();
    ciborium::into_writer(&values, &mut buf)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(buf)
}

fn decode_zps(buf: &[u8]) -> Result<Vec<Zp>> {
    let values: Vec<Value> =
        ciborium::from_reader(buf).map_err(|e| StoreError::Serialization(e.to_string()))?;
    let p = p_sks();
    values
        .iter()
        .map(|v| match v.as_bytes() {
            Some(bytes) => Ok(Zp::from_le_bytes(&p, bytes)),
            None => Err(StoreError::Serialization(
                "expected byte string element".into(),
            )),
        })
        .collect()
}

fn load_node(conn: &Connection, key: &Bitstring) -> Result<Option<NodeRow>> {
    let row = conn
        .query_row(
            "SELECT svalues, size, leaf, elements FROM ptree_nodes
             WHERE key_bits = ?1 AND key_bytes = ?2",
            params![key.bit_len() as i64, key.as_bytes()],
            |row| {
                Ok((
                    row.get::<_, Vec<u8>>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, bool>(2)?,
                    row.get::<_, Vec<u8>>(3)?,
                ))
            },
        )
        .optional()?;
    let Some((svalues, size, leaf, elements)) = row else {
        return Ok(None);
    };
    Ok(Some(NodeRow {
        key: key.clone(),
        svalues: decode_zps(&svalues)?,
        size: usize::try_from(size)
            .map_err(|_| StoreError::InvalidData(format!("negative node size {size}")))?,
        leaf,
        elements: decode_zps(&elements)?,
    }))
}

fn load_required(conn: &Connection, key: &Bitstring) -> Result<NodeRow> {
    load_node(conn, key)?.ok_or_else(|| StoreError::NodeNotFound(key.to_string()))
}

fn save_node(conn: &Connection, node: &NodeRow) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO ptree_nodes (key_bits, key_bytes, svalues, size, leaf, elements)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            node.key.bit_len() as i64,
            node.key.as_bytes(),
            encode_zps(&node.svalues)?,
            node.size as i64,
            node.leaf,
            encode_zps(&node.elements)?,
        ],
    )?;
    Ok(())
}

fn delete_node(conn: &Connection, key: &Bitstring) -> Result<()> {
    conn.execute(
        "DELETE FROM ptree_nodes WHERE key_bits = ?1 AND key_bytes = ?2",
        params![key.bit_len() as i64, key.as_bytes()],
    )?;
    Ok(())
}

fn has_element(conn: &Connection, z: &Zp) -> Result<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM ptree_elements WHERE element = ?1",
            params![z.to_padded_bytes()],
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tree maintenance
// ─────────────────────────────────────────────────────────────────────────────

fn ensure_root(conn: &Connection, geometry: &Geometry) -> Result<()> {
    let config = geometry.config;
    let stored: Option<(i64, i64, i64)> = conn
        .query_row(
            "SELECT thresh_mult, bit_quantum, mbar FROM tree_config WHERE id = 0",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;
    match stored {
        Some((thresh_mult, bit_quantum, mbar)) => {
            if (thresh_mult, bit_quantum, mbar)
                != (config.thresh_mult as i64, config.bit_quantum as i64, config.mbar as i64)
            {
                return Err(StoreError::InvalidData(format!(
                    "tree was built with threshMult={thresh_mult} bitQuantum={bit_quantum} mBar={mbar}"
                )));
            }
        }
        None => {
            conn.execute(
                "INSERT INTO tree_config (id, thresh_mult, bit_quantum, mbar) VALUES (0, ?1, ?2, ?3)",
                params![
                    config.thresh_mult as i64,
                    config.bit_quantum as i64,
                    config.mbar as i64
                ],
            )?;
        }
    }
    let root = Bitstring::new(0);
    if load_node(conn, &root)?.is_none() {
        save_node(conn, &NodeRow::empty(root, &geometry.points))?;
    }
    Ok(())
}

fn clear(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "DELETE FROM ptree_nodes;
         DELETE FROM ptree_elements;
         DELETE FROM tree_config;",
    )?;
    Ok(())
}

fn descend(conn: &Connection, geometry: &Geometry, bs: &Bitstring) -> Result<NodeRow> {
    let bq = geometry.config.bit_quantum;
    let mut node = load_required(conn, &Bitstring::new(0))?;
    let mut depth = 0;
    while depth * bq < bs.bit_len() && !node.leaf {
        let key = child_key(&node.key, next_child(bs, depth, bq), bq);
        node = load_required(conn, &key)?;
        depth += 1;
    }
    Ok(node)
}

fn collect_elements(conn: &Connection, geometry: &Geometry, node: NodeRow) -> Result<Vec<Zp>> {
    let bq = geometry.config.bit_quantum;
    let mut out = Vec::with_capacity(node.size);
    let mut pending = vec![node];
    while let Some(node) = pending.pop() {
        if node.leaf {
            out.extend(node.elements);
            continue;
        }
        for i in 0..geometry.config.num_children() {
            pending.push(load_required(conn, &child_key(&node.key, i, bq))?);
        }
    }
    Ok(out)
}

fn insert_at(
    conn: &Connection,
    geometry: &Geometry,
    key: Bitstring,
    z: &Zp,
    marray: &[Zp],
    bs: &Bitstring,
    depth: usize,
) -> Result<()> {
    let mut node = load_required(conn, &key)?;
    update_svalues(&mut node.svalues, marray);
    node.size += 1;
    if node.leaf {
        if node.elements.len() <= geometry.config.split_threshold() {
            if node.elements.contains(z) {
                return Err(StoreError::DuplicateElement(z.to_string()));
            }
            node.elements.push(z.clone());
            return save_node(conn, &node);
        }
        split(conn, geometry, &mut node, depth)?;
    }
    save_node(conn, &node)?;
    let bq = geometry.config.bit_quantum;
    let child = child_key(&key, next_child(bs, depth, bq), bq);
    insert_at(conn, geometry, child, z, marray, bs, depth + 1)
}

fn split(conn: &Connection, geometry: &Geometry, node: &mut NodeRow, depth: usize) -> Result<()> {
    tracing::debug!(depth, elements = node.elements.len(), "splitting leaf");
    let bq = geometry.config.bit_quantum;
    node.leaf = false;
    let elements = std::mem::take(&mut node.elements);
    for i in 0..geometry.config.num_children() {
        save_node(
            conn,
            &NodeRow::empty(child_key(&node.key, i, bq), &geometry.points),
        )?;
    }
    for z in elements {
        let bs = Bitstring::from_zp(&z);
        let marray = add_element_array(&geometry.points, &z)?;
        let child = child_key(&node.key, next_child(&bs, depth, bq), bq);
        insert_at(conn, geometry, child, &z, &marray, &bs, depth + 1)?;
    }
    Ok(())
}

fn remove_at(
    conn: &Connection,
    geometry: &Geometry,
    key: Bitstring,
    z: &Zp,
    marray: &[Zp],
    bs: &Bitstring,
    depth: usize,
) -> Result<()> {
    let mut node = load_required(conn, &key)?;
    update_svalues(&mut node.svalues, marray);
    node.size = node
        .size
        .checked_sub(1)
        .ok_or_else(|| StoreError::ElementNotFound(z.to_string()))?;
    if !node.leaf {
        if node.size > geometry.config.join_threshold() {
            save_node(conn, &node)?;
            let bq = geometry.config.bit_quantum;
            let child = child_key(&key, next_child(bs, depth, bq), bq);
            return remove_at(conn, geometry, child, z, marray, bs, depth + 1);
        }
        join(conn, geometry, &mut node)?;
    }
    let i = node
        .elements
        .iter()
        .position(|e| e == z)
        .ok_or_else(|| StoreError::ElementNotFound(z.to_string()))?;
    node.elements.swap_remove(i);
    save_node(conn, &node)
}

fn join(conn: &Connection, geometry: &Geometry, node: &mut NodeRow) -> Result<()> {
    let bq = geometry.config.bit_quantum;
    let n = geometry.config.num_children();
    let mut pending: Vec<Bitstring> = (0..n).map(|i| child_key(&node.key, i, bq)).collect();
    while let Some(key) = pending.pop() {
        let child = load_required(conn, &key)?;
        if child.leaf {
            node.elements.extend(child.elements);
        } else {
            pending.extend((0..n).map(|i| child_key(&key, i, bq)));
        }
        delete_node(conn, &key)?;
    }
    tracing::debug!(elements = node.elements.len(), "joined children");
    node.leaf = true;
    Ok(())
}

#[async_trait]
impl PrefixTree for SqlitePrefixTree {
    fn config(&self) -> &PTreeConfig {
        &self.geometry.config
    }

    fn points(&self) -> &[Zp] {
        &self.geometry.points
    }

    async fn init(&self) -> Result<()> {
        self.run(|conn, geometry| {
            let tx = conn.transaction()?;
            clear(&tx)?;
            ensure_root(&tx, geometry)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn create(&self) -> Result<()> {
        self.run(|conn, geometry| ensure_root(conn, geometry)).await
    }

    async fn drop_tree(&self) -> Result<()> {
        self.run(|conn, _| clear(conn)).await
    }

    async fn close(&self) -> Result<()> {
        self.run(|conn, _| {
            conn.execute_batch("PRAGMA optimize;")?;
            Ok(())
        })
        .await
    }

    async fn root(&self) -> Result<PrefixNode> {
        self.run(|conn, _| Ok(load_required(conn, &Bitstring::new(0))?.snapshot()))
            .await
    }

    async fn node(&self, key: &Bitstring) -> Result<PrefixNode> {
        let key = key.clone();
        self.run(move |conn, geometry| Ok(descend(conn, geometry, &key)?.snapshot()))
            .await
    }

    async fn children(&self, node: &PrefixNode) -> Result<Vec<PrefixNode>> {
        let key = node.key().clone();
        self.run(move |conn, geometry| {
            let node = load_required(conn, &key)?;
            if node.leaf {
                return Ok(Vec::new());
            }
            let bq = geometry.config.bit_quantum;
            (0..geometry.config.num_children())
                .map(|i| load_required(conn, &child_key(&key, i, bq)).map(NodeRow::snapshot))
                .collect::<Result<Vec<_>>>()
        })
        .await
    }

    async fn elements(&self, node: &PrefixNode) -> Result<Vec<Zp>> {
        let key = node.key().clone();
        self.run(move |conn, geometry| {
            let node = load_required(conn, &key)?;
            collect_elements(conn, geometry, node)
        })
        .await
    }

    async fn contains(&self, z: &Zp) -> Result<bool> {
        let z = z.clone();
        self.run(move |conn, _| has_element(conn, &z)).await
    }

    async fn insert(&self, z: &Zp) -> Result<()> {
        let z = z.clone();
        self.run(move |conn, geometry| {
            let marray = add_element_array(&geometry.points, &z)?;
            let tx = conn.transaction()?;
            if has_element(&tx, &z)? {
                return Err(StoreError::DuplicateElement(z.to_string()));
            }
            let bs = Bitstring::from_zp(&z);
            insert_at(&tx, geometry, Bitstring::new(0), &z, &marray, &bs, 0)?;
            tx.execute(
                "INSERT INTO ptree_elements (element) VALUES (?1)",
                params![z.to_padded_bytes()],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn remove(&self, z: &Zp) -> Result<()> {
        let z = z.clone();
        self.run(move |conn, geometry| {
            let marray = del_element_array(&geometry.points, &z)?;
            let tx = conn.transaction()?;
            if !has_element(&tx, &z)? {
                return Err(StoreError::ElementNotFound(z.to_string()));
            }
            let bs = Bitstring::from_zp(&z);
            remove_at(&tx, geometry, Bitstring::new(0), &z, &marray, &bs, 0)?;
            tx.execute(
                "DELETE FROM ptree_elements WHERE element = ?1",
                params![z.to_padded_bytes()],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemPrefixTree;
    use crate::traits::PrefixTreeExt;
    use tempfile::tempdir;

    fn z(n: i64) -> Zp {
        Zp::from_i64(&p_sks(), n)
    }

    #[tokio::test]
    async fn test_open_creates_empty_root() {
        let tree = SqlitePrefixTree::open_memory(PTreeConfig::default()).unwrap();
        let root = tree.root().await.unwrap();
        assert!(root.is_leaf());
        assert_eq!(root.size(), 0);
        assert_eq!(root.svalues().len(), 6);
        assert!(root.svalues().iter().all(Zp::is_one));
    }

    #[tokio::test]
    async fn test_matches_memory_tree() {
        let sqlite = SqlitePrefixTree::open_memory(PTreeConfig::default()).unwrap();
        let memory = MemPrefixTree::default();
        for i in 1..180 {
            let item = z(65537 * i + 7 * i);
            sqlite.insert(&item).await.unwrap();
            memory.insert(&item).await.unwrap();
        }
        for i in (1..180).step_by(3) {
            let item = z(65537 * i + 7 * i);
            sqlite.remove(&item).await.unwrap();
            memory.remove(&item).await.unwrap();
        }

        let mut stack = vec![memory.root().await.unwrap()];
        while let Some(expected) = stack.pop() {
            let got = sqlite.node(expected.key()).await.unwrap();
            assert_eq!(got, expected);
            let mut got_elements = sqlite.elements(&got).await.unwrap();
            let mut want_elements = memory.elements(&expected).await.unwrap();
            got_elements.sort();
            want_elements.sort();
            assert_eq!(got_elements, want_elements);
            stack.extend(memory.children(&expected).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_split_then_join_restores_root() {
        let tree = SqlitePrefixTree::open_memory(PTreeConfig::default()).unwrap();
        let items: Vec<Zp> = (0..200).map(|i| z(65536 + i)).collect();
        tree.insert_all(&items).await.unwrap();
        assert!(!tree.root().await.unwrap().is_leaf());

        for item in &items {
            tree.remove(item).await.unwrap();
        }
        let root = tree.root().await.unwrap();
        assert!(root.is_leaf());
        assert_eq!(root.size(), 0);
        assert!(root.svalues().iter().all(Zp::is_one));
        assert!(tree.children(&root).await.unwrap().is_empty());

        let orphans: i64 = tree
            .run(|conn, _| {
                Ok(conn.query_row("SELECT COUNT(*) FROM ptree_nodes", [], |row| row.get(0))?)
            })
            .await
            .unwrap();
        assert_eq!(orphans, 1);
    }

    #[tokio::test]
    async fn test_duplicate_and_missing() {
        let tree = SqlitePrefixTree::open_memory(PTreeConfig::default()).unwrap();
        tree.insert(&z(65537)).await.unwrap();
        assert!(matches!(
            tree.insert(&z(65537)).await,
            Err(StoreError::DuplicateElement(_))
        ));
        assert!(matches!(
            tree.remove(&z(65539)).await,
            Err(StoreError::ElementNotFound(_))
        ));
        assert_eq!(tree.root().await.unwrap().size(), 1);
    }

    #[tokio::test]
    async fn test_reopen_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ptree.db");
        let root = {
            let tree = SqlitePrefixTree::open(&path, PTreeConfig::default()).unwrap();
            for i in 1..100 {
                tree.insert(&z(65537 * i)).await.unwrap();
            }
            tree.close().await.unwrap();
            tree.root().await.unwrap()
        };

        let tree = SqlitePrefixTree::open(&path, PTreeConfig::default()).unwrap();
        assert_eq!(tree.root().await.unwrap(), root);
        assert!(tree.contains(&z(65537 * 42)).await.unwrap());
    }

    #[tokio::test]
    async fn test_reopen_with_other_geometry_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ptree.db");
        SqlitePrefixTree::open(&path, PTreeConfig::default()).unwrap();

        let other = PTreeConfig {
            mbar: 8,
            ..PTreeConfig::default()
        };
        assert!(matches!(
            SqlitePrefixTree::open(&path, other),
            Err(StoreError::InvalidData(_))
        ));
    }

    #[tokio::test]
    async fn test_drop_then_create() {
        let tree = SqlitePrefixTree::open_memory(PTreeConfig::default()).unwrap();
        tree.insert(&z(65537)).await.unwrap();
        tree.drop_tree().await.unwrap();
        assert!(matches!(tree.root().await, Err(StoreError::NodeNotFound(_))));
        tree.create().await.unwrap();
        assert_eq!(tree.root().await.unwrap().size(), 0);
        assert!(!tree.contains(&z(65537)).await.unwrap());
    }
}
