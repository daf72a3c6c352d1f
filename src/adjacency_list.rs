use std::collections::HashMap;
use core::hash::Hash;




/**
 * A minimal directed graph structure that stores only edges, each with a
 * value attached. Outgoing edges keep their insertion order.
 */
#[derive(Clone, Debug)]
pub struct AdjacencyList<K, E = ()> {
    outgoing: HashMap<K, Vec<(K, E)>>,
    incoming: HashMap<K, Vec<K>>,
}




// ============================================================================
impl<K, E> AdjacencyList<K, E> where K: Hash + Eq + Clone {


    pub fn new() -> Self {
        Self::default()
    }


    /**
     * Return the number of edges in the graph.
     */
    pub fn len(&self) -> usize {
        self.outgoing.values().map(|edges| edges.len()).sum()
    }


    /**
     * Determine whether there are any edges in the graph.
     */
    pub fn is_empty(&self) -> bool {
        self.outgoing.values().all(|edges| edges.is_empty())
    }


    /**
     * Insert an edge from a -> b carrying the value e. Duplicate and circular
     * edges are allowed.
     */
    pub fn insert(&mut self, a0: K, b0: K, e: E) {
        let a1 = a0.clone();
        let b1 = b0.clone();
        self.outgoing.entry(a0).or_default().push((b0, e));
        self.incoming.entry(b1).or_default().push(a1);
    }


    /**
     * Determine whether the given edge exists.
     */
    pub fn contains(&self, a: &K, b: &K) -> bool {
        self.outgoing
            .get(a)
            .map_or(false, |edges| edges.iter().any(|(k, _)| k == b))
    }


    /**
     * Remove an edge if it exists.
     */
    pub fn remove(&mut self, a: &K, b: &K) {
        if let Some(edges) = self.outgoing.get_mut(a) {
            edges.retain(|(k, _)| k != b)
        }
        if let Some(edges) = self.incoming.get_mut(b) {
            edges.retain(|k| k != a)
        }
    }


    /**
     * Remove every edge emanating from the given vertex.
     */
    pub fn remove_outgoing(&mut self, a: &K) {
        for (b, _) in self.outgoing.remove(a).unwrap_or_default() {
            if let Some(edges) = self.incoming.get_mut(&b) {
                edges.retain(|k| k != a)
            }
        }
    }


    /**
     * Remove every edge touching the given vertex.
     */
    pub fn remove_vertex(&mut self, a: &K) {
        self.remove_outgoing(a);

        for b in self.incoming.remove(a).unwrap_or_default() {
            if let Some(edges) = self.outgoing.get_mut(&b) {
                edges.retain(|(k, _)| k != a)
            }
        }
    }


    pub fn clear(&mut self) {
        self.outgoing.clear();
        self.incoming.clear();
    }


    /**
     * Return an iterator over the vertices with edges emanating from the given
     * vertex, in insertion order, with the edge values.
     */
    pub fn outgoing_edges(&self, a: &K) -> impl Iterator<Item = &(K, E)> {
        self.outgoing.get(a).into_iter().flat_map(|edges| edges.iter())
    }


    /**
     * Return an iterator over the vertices with edges pointing to the given
     * vertex.
     */
    pub fn incoming_edges(&self, b: &K) -> impl Iterator<Item = &K> {
        self.incoming.get(b).into_iter().flat_map(|edges| edges.iter())
    }
}

impl<K, E> Default for AdjacencyList<K, E> {
    fn default() -> Self {
        Self {
            outgoing: HashMap::new(),
            incoming: HashMap::new(),
        }
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::AdjacencyList;


    #[test]
    fn graph_contained_works() {
        let mut edges = AdjacencyList::new();
        edges.insert(0, 1, ());
        assert!(edges.contains(&0, &1));
        assert!(!edges.contains(&1, &0));
    }


    #[test]
    fn graph_has_the_correct_length() {
        let mut edges = AdjacencyList::new();
        edges.insert(0, 1, ());
        edges.insert(1, 0, ());
        edges.insert(1, 1, ());
        edges.insert(0, 0, ());
        assert_eq!(edges.len(), 4);
    }


    #[test]
    fn graph_can_remove_edge() {
        let mut edges = AdjacencyList::new();
        edges.insert(0, 1, ());
        edges.insert(1, 0, ());
        edges.remove(&1, &0);
        assert!(edges.contains(&0, &1));
        assert!(!edges.contains(&1, &0));
        assert_eq!(edges.len(), 1);
        assert_eq!(edges.incoming_edges(&0).count(), 0);
    }


    #[test]
    fn graph_can_iterate_incoming_and_outgoing_edges() {
        let mut edges = AdjacencyList::new();
        edges.insert(0, 1, 'a');
        edges.insert(0, 2, 'b');
        edges.insert(0, 3, 'c');

        edges.insert(4, 1, 'd');
        edges.insert(4, 2, 'e');

        assert_eq!(edges.incoming_edges(&1).count(), 2);
        assert_eq!(edges.incoming_edges(&3).count(), 1);
        assert_eq!(edges.outgoing_edges(&0).map(|(_, e)| *e).collect::<String>(), "abc");
        assert_eq!(edges.outgoing_edges(&4).count(), 2);
    }


    #[test]
    fn removing_a_vertex_drops_edges_in_both_directions() {
        let mut edges = AdjacencyList::new();
        edges.insert(0, 1, ());
        edges.insert(1, 2, ());
        edges.insert(2, 1, ());
        edges.insert(2, 0, ());

        edges.remove_outgoing(&2);
        assert_eq!(edges.len(), 2);
        assert_eq!(edges.incoming_edges(&0).count(), 0);

        edges.remove_vertex(&1);
        assert!(edges.is_empty());
        assert_eq!(edges.incoming_edges(&2).count(), 0);

        edges.insert(5, 6, ());
        edges.clear();
        assert!(edges.is_empty());
    }
}
