//! In-memory implementation of the PrefixTree trait.
//!
//! Nodes are owned recursively from the root. Used for tests and for peers
//! that rebuild their tree from the application database at startup.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use sks_recon_core::{p_sks, zpoints, Bitstring, Zp, ZSet};

use crate::config::PTreeConfig;
use crate::error::{Result, StoreError};
use crate::traits::{
    add_element_array, child_key, del_element_array, next_child, update_svalues, PrefixNode,
    PrefixTree,
};

/// In-memory prefix tree. Thread-safe via RwLock.
pub struct MemPrefixTree {
    config: PTreeConfig,
    points: Vec<Zp>,
    inner: RwLock<MemTreeInner>,
}

struct MemTreeInner {
    root: MemNode,
    all: ZSet,
}

struct MemNode {
    svalues: Vec<Zp>,
    size: usize,
    children: Vec<MemNode>,
    elements: Vec<Zp>,
}

impl MemPrefixTree {
    /// Create an empty tree with the given geometry.
    pub fn new(config: PTreeConfig) -> Self {
        let points = zpoints(&p_sks(), config.num_samples());
        let root = MemNode::empty(&points);
        Self {
            config,
            points,
            inner: RwLock::new(MemTreeInner {
                root,
                all: ZSet::new(),
            }),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemTreeInner>> {
        self.inner
            .read()
            .map_err(|_| StoreError::InvalidData("tree lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemTreeInner>> {
        self.inner
            .write()
            .map_err(|_| StoreError::InvalidData("tree lock poisoned".into()))
    }

    fn reset(&self) -> Result<()> {
        let mut inner = self.write()?;
        inner.root = MemNode::empty(&self.points);
        inner.all = ZSet::new();
        Ok(())
    }
}

impl Default for MemPrefixTree {
    fn default() -> Self {
        Self::new(PTreeConfig::default())
    }
}

impl MemNode {
    fn empty(points: &[Zp]) -> Self {
        Self {
            svalues: points.iter().map(|p| Zp::one(p.modulus())).collect(),
            size: 0,
            children: Vec::new(),
            elements: Vec::new(),
        }
    }

    fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    fn snapshot(&self, key: Bitstring) -> PrefixNode {
        PrefixNode {
            key,
            svalues: self.svalues.clone(),
            size: self.size,
            leaf: self.is_leaf(),
        }
    }

    /// Descend along `bs` while interior, returning the node and its key.
    fn descend(&self, bs: &Bitstring, bit_quantum: usize) -> (&MemNode, Bitstring) {
        let mut node = self;
        let mut key = Bitstring::new(0);
        let mut depth = 0;
        while depth * bit_quantum < bs.bit_len() && !node.is_leaf() {
            let index = next_child(bs, depth, bit_quantum);
            key = child_key(&key, index, bit_quantum);
            node = &node.children[index];
            depth += 1;
        }
        (node, key)
    }

    fn collect_elements(&self, out: &mut Vec<Zp>) {
        out.extend(self.elements.iter().cloned());
        for child in &self.children {
            child.collect_elements(out);
        }
    }

    fn insert(
        &mut self,
        tree: &MemPrefixTree,
        z: &Zp,
        marray: &[Zp],
        bs: &Bitstring,
        depth: usize,
    ) -> Result<()> {
        update_svalues(&mut self.svalues, marray);
        self.size += 1;
        if self.is_leaf() {
            if self.elements.len() <= tree.config.split_threshold() {
                if self.elements.contains(z) {
                    return Err(StoreError::DuplicateElement(z.to_string()));
                }
                self.elements.push(z.clone());
                return Ok(());
            }
            self.split(tree, depth)?;
        }
        let index = next_child(bs, depth, tree.config.bit_quantum);
        self.children[index].insert(tree, z, marray, bs, depth + 1)
    }

    fn split(&mut self, tree: &MemPrefixTree, depth: usize) -> Result<()> {
        tracing::debug!(depth, elements = self.elements.len(), "splitting leaf");
        self.children = (0..tree.config.num_children())
            .map(|_| MemNode::empty(&tree.points))
            .collect();
        for z in std::mem::take(&mut self.elements) {
            let bs = Bitstring::from_zp(&z);
            let marray = add_element_array(&tree.points, &z)?;
            let index = next_child(&bs, depth, tree.config.bit_quantum);
            self.children[index].insert(tree, &z, &marray, &bs, depth + 1)?;
        }
        Ok(())
    }

    fn remove(
        &mut self,
        tree: &MemPrefixTree,
        z: &Zp,
        marray: &[Zp],
        bs: &Bitstring,
        depth: usize,
    ) -> Result<()> {
        update_svalues(&mut self.svalues, marray);
        self.size -= 1;
        if !self.is_leaf() {
            if self.size > tree.config.join_threshold() {
                let index = next_child(bs, depth, tree.config.bit_quantum);
                return self.children[index].remove(tree, z, marray, bs, depth + 1);
            }
            self.join(depth);
        }
        match self.elements.iter().position(|e| e == z) {
            Some(i) => {
                self.elements.swap_remove(i);
                Ok(())
            }
            None => Err(StoreError::ElementNotFound(z.to_string())),
        }
    }

    fn join(&mut self, depth: usize) {
        let mut elements = Vec::with_capacity(self.size + 1);
        for child in std::mem::take(&mut self.children) {
            child.collect_elements(&mut elements);
        }
        tracing::debug!(depth, elements = elements.len(), "joining children");
        self.elements = elements;
    }
}

#[async_trait]
impl PrefixTree for MemPrefixTree {
    fn config(&self) -> &PTreeConfig {
        &self.config
    }

    fn points(&self) -> &[Zp] {
        &self.points
    }

    async fn init(&self) -> Result<()> {
        self.reset()
    }

    async fn create(&self) -> Result<()> {
        Ok(())
    }

    async fn drop_tree(&self) -> Result<()> {
        self.reset()
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    async fn root(&self) -> Result<PrefixNode> {
        let inner = self.read()?;
        Ok(inner.root.snapshot(Bitstring::new(0)))
    }

    async fn node(&self, key: &Bitstring) -> Result<PrefixNode> {
        let inner = self.read()?;
        let (node, found) = inner.root.descend(key, self.config.bit_quantum);
        Ok(node.snapshot(found))
    }

    async fn children(&self, node: &PrefixNode) -> Result<Vec<PrefixNode>> {
        let inner = self.read()?;
        let bq = self.config.bit_quantum;
        let (found, key) = inner.root.descend(node.key(), bq);
        if key != *node.key() {
            return Err(StoreError::NodeNotFound(node.key().to_string()));
        }
        Ok(found
            .children
            .iter()
            .enumerate()
            .map(|(i, child)| child.snapshot(child_key(&key, i, bq)))
            .collect())
    }

    async fn elements(&self, node: &PrefixNode) -> Result<Vec<Zp>> {
        let inner = self.read()?;
        let (found, key) = inner.root.descend(node.key(), self.config.bit_quantum);
        if key != *node.key() {
            return Err(StoreError::NodeNotFound(node.key().to_string()));
        }
        let mut out = Vec::with_capacity(found.size);
        found.collect_elements(&mut out);
        Ok(out)
    }

    async fn contains(&self, z: &Zp) -> Result<bool> {
        Ok(self.read()?.all.contains(z))
    }

    async fn insert(&self, z: &Zp) -> Result<()> {
        let marray = add_element_array(&self.points, z)?;
        let bs = Bitstring::from_zp(z);
        let mut inner = self.write()?;
        if inner.all.contains(z) {
            return Err(StoreError::DuplicateElement(z.to_string()));
        }
        inner.root.insert(self, z, &marray, &bs, 0)?;
        inner.all.insert(z.clone());
        Ok(())
    }

    async fn remove(&self, z: &Zp) -> Result<()> {
        let marray = del_element_array(&self.points, z)?;
        let bs = Bitstring::from_zp(z);
        let mut inner = self.write()?;
        if !inner.all.contains(z) {
            return Err(StoreError::ElementNotFound(z.to_string()));
        }
        inner.root.remove(self, z, &marray, &bs, 0)?;
        inner.all.remove(z);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::PrefixTreeExt;

    fn z(n: i64) -> Zp {
        Zp::from_i64(&p_sks(), n)
    }

    #[tokio::test]
    async fn test_insert_nodes() {
        let tree = MemPrefixTree::default();
        let root = tree.root().await.unwrap();
        assert!(root.is_leaf());
        assert_eq!(root.size(), 0);
        assert!(root.svalues().iter().all(Zp::is_one));

        tree.insert(&z(100)).await.unwrap();
        tree.insert(&z(300)).await.unwrap();
        tree.insert(&z(500)).await.unwrap();

        let root = tree.root().await.unwrap();
        assert_eq!(root.size(), 3);
        let mut elements = tree.elements(&root).await.unwrap();
        elements.sort();
        assert_eq!(elements, vec![z(100), z(300), z(500)]);
        assert!(tree.contains(&z(300)).await.unwrap());
        assert!(!tree.contains(&z(301)).await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_insert_fails() {
        let tree = MemPrefixTree::default();
        tree.insert(&z(65537)).await.unwrap();
        let before = tree.root().await.unwrap();
        assert!(matches!(
            tree.insert(&z(65537)).await,
            Err(StoreError::DuplicateElement(_))
        ));
        assert_eq!(tree.root().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_remove_missing_fails() {
        let tree = MemPrefixTree::default();
        assert!(matches!(
            tree.remove(&z(65537)).await,
            Err(StoreError::ElementNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_sample_point_element_fails() {
        let tree = MemPrefixTree::default();
        assert!(matches!(
            tree.insert(&z(2)).await,
            Err(StoreError::SamplePointElement(_))
        ));
        assert_eq!(tree.root().await.unwrap().size(), 0);
    }

    #[tokio::test]
    async fn test_split_then_join_restores_root() {
        let tree = MemPrefixTree::default();
        let items: Vec<Zp> = (0..200).map(|i| z(65536 + i)).collect();
        for item in &items {
            tree.insert(item).await.unwrap();
        }
        let root = tree.root().await.unwrap();
        assert!(!root.is_leaf());
        assert_eq!(root.size(), 200);
        assert_eq!(tree.children(&root).await.unwrap().len(), 4);

        for item in &items {
            tree.remove(item).await.unwrap();
        }
        let root = tree.root().await.unwrap();
        assert!(root.is_leaf());
        assert_eq!(root.size(), 0);
        assert!(root.svalues().iter().all(Zp::is_one));
        assert!(tree.children(&root).await.unwrap().is_empty());
        assert!(tree.elements(&root).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_insert_remove_restores_svalues() {
        let tree = MemPrefixTree::default();
        for i in 1..120 {
            tree.insert(&z(65537 * i)).await.unwrap();
        }
        let target = z(70001 * 3);
        let before = tree.find(&target).await.unwrap();
        let root_before = tree.root().await.unwrap();

        tree.insert(&target).await.unwrap();
        assert_ne!(tree.root().await.unwrap().svalues(), root_before.svalues());
        tree.remove(&target).await.unwrap();

        assert_eq!(tree.root().await.unwrap().svalues(), root_before.svalues());
        assert_eq!(tree.node(before.key()).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_sizes_sum_over_children() {
        let tree = MemPrefixTree::default();
        for i in 1..400 {
            tree.insert(&z(68111 * i)).await.unwrap();
        }
        let mut stack = vec![tree.root().await.unwrap()];
        while let Some(node) = stack.pop() {
            let children = tree.children(&node).await.unwrap();
            if node.is_leaf() {
                assert!(node.size() <= tree.config().split_threshold() + 1);
                assert_eq!(tree.elements(&node).await.unwrap().len(), node.size());
            } else {
                assert_eq!(children.iter().map(PrefixNode::size).sum::<usize>(), node.size());
                for child in &children {
                    assert!(node.key().is_prefix_of(child.key()));
                    let parent = tree.parent(child).await.unwrap().unwrap();
                    assert_eq!(parent.key(), node.key());
                }
            }
            stack.extend(children);
        }
    }

    #[tokio::test]
    async fn test_find_lands_on_holding_leaf() {
        let tree = MemPrefixTree::default();
        let items: Vec<Zp> = (1..150).map(|i| z(65537 * i + i)).collect();
        tree.insert_all(&items).await.unwrap();
        for item in &items {
            let node = tree.find(item).await.unwrap();
            assert!(node.is_leaf());
            assert!(tree.elements(&node).await.unwrap().contains(item));
        }
    }

    #[tokio::test]
    async fn test_init_resets() {
        let tree = MemPrefixTree::default();
        tree.insert(&z(65537)).await.unwrap();
        tree.init().await.unwrap();
        assert_eq!(tree.root().await.unwrap().size(), 0);
        assert!(!tree.contains(&z(65537)).await.unwrap());
    }
}
