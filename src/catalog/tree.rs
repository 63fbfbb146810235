use std::collections::{BTreeMap, HashMap, HashSet};

/// A region and its direct subregions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionNode {
    pub name: String,
    pub children: BTreeMap<String, RegionNode>,
}

impl RegionNode {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            children: BTreeMap::new(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Names of all descendants without children of their own, depth first.
    /// A node without children is its own only leaf.
    pub fn leaf_names(&self) -> Vec<String> {
        let mut leaves = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            if node.is_leaf() {
                leaves.push(node.name.clone());
                continue;
            }
            // Reversed so that children come off the stack in name order.
            stack.extend(node.children.values().rev());
        }
        leaves
    }
}

/// The region -> subregion hierarchy of the extract catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionIndex {
    pub roots: BTreeMap<String, RegionNode>,
}

/// One (id, parent id, name) row of a flat catalog listing.
pub struct ParentLink<'a> {
    pub id: &'a str,
    pub parent: Option<&'a str>,
    pub name: &'a str,
}

impl RegionIndex {
    /// Build the hierarchy from a flat listing in which children refer to their parent by id.
    ///
    /// Names must be unique across the whole index: a name seen twice keeps its first
    /// occurrence. Entries whose parent is unknown become roots.
    pub fn from_parent_links<'a>(links: impl IntoIterator<Item = ParentLink<'a>>) -> Self {
        let mut seen_names = HashSet::new();
        let mut names_by_id: HashMap<&str, &str> = HashMap::new();
        let mut children_by_parent: HashMap<&str, Vec<&str>> = HashMap::new();
        let mut root_ids = Vec::new();
        let links: Vec<ParentLink> = links.into_iter().collect();

        for link in &links {
            if !seen_names.insert(link.name) {
                log::warn!(
                    "Region name {:?} (id {:?}) is already in the index, skipping it",
                    link.name,
                    link.id
                );
                continue;
            }
            names_by_id.insert(link.id, link.name);
        }
        let mut placed = HashSet::new();
        for link in &links {
            if names_by_id.get(link.id) != Some(&link.name) || !placed.insert(link.id) {
                continue;
            }
            match link.parent {
                Some(parent) if names_by_id.contains_key(parent) => {
                    children_by_parent.entry(parent).or_default().push(link.id)
                }
                _ => root_ids.push(link.id),
            }
        }

        let roots = root_ids
            .into_iter()
            .map(|id| {
                let node = build_node(id, &names_by_id, &children_by_parent);
                (node.name.clone(), node)
            })
            .collect();
        Self { roots }
    }

    /// Find the node with the given name anywhere in the hierarchy.
    pub fn find(&self, name: &str) -> Option<&RegionNode> {
        let mut stack: Vec<&RegionNode> = self.roots.values().collect();
        while let Some(node) = stack.pop() {
            if node.name == name {
                return Some(node);
            }
            stack.extend(node.children.values());
        }
        None
    }

    /// Every region and subregion name in the index.
    pub fn names(&self) -> Vec<String> {
        let mut names = Vec::new();
        let mut stack: Vec<&RegionNode> = self.roots.values().rev().collect();
        while let Some(node) = stack.pop() {
            names.push(node.name.clone());
            stack.extend(node.children.values().rev());
        }
        names
    }

    /// Names of all regions without subregions, depth first.
    pub fn leaf_names(&self) -> Vec<String> {
        self.roots
            .values()
            .flat_map(|root| root.leaf_names())
            .collect()
    }
}

fn build_node(
    id: &str,
    names_by_id: &HashMap<&str, &str>,
    children_by_parent: &HashMap<&str, Vec<&str>>,
) -> RegionNode {
    let mut node = RegionNode::new(names_by_id[id]);
    if let Some(children) = children_by_parent.get(id) {
        for child_id in children {
            let child = build_node(child_id, names_by_id, children_by_parent);
            node.children.insert(child.name.clone(), child);
        }
    }
    node
}
