//! Strongly connected components
//!
//! Iterative Tarjan: call graphs of real runtimes are deep enough that a
//! recursive walk can exhaust the native stack.

/// Components of a graph given as successor lists.
///
/// Components come out in reverse topological order: every component is
/// emitted after all components it can reach. Members of each component are
/// sorted by node index.
pub fn strongly_connected_components(successors: &[Vec<usize>]) -> Vec<Vec<usize>> {
    const UNVISITED: usize = usize::MAX;

    let n = successors.len();
    let mut index = vec![UNVISITED; n];
    let mut lowlink = vec![0usize; n];
    let mut on_stack = vec![false; n];
    let mut stack: Vec<usize> = Vec::new();
    let mut components = Vec::new();
    let mut next_index = 0usize;

    // (node, position of the next successor to look at)
    let mut frames: Vec<(usize, usize)> = Vec::new();

    for root in 0..n {
        if index[root] != UNVISITED {
            continue;
        }
        frames.push((root, 0));
        index[root] = next_index;
        lowlink[root] = next_index;
        next_index += 1;
        stack.push(root);
        on_stack[root] = true;

        while let Some(frame) = frames.last_mut() {
            let (node, pos) = *frame;
            if let Some(&succ) = successors[node].get(pos) {
                frame.1 += 1;
                if index[succ] == UNVISITED {
                    index[succ] = next_index;
                    lowlink[succ] = next_index;
                    next_index += 1;
                    stack.push(succ);
                    on_stack[succ] = true;
                    frames.push((succ, 0));
                } else if on_stack[succ] {
                    lowlink[node] = lowlink[node].min(index[succ]);
                }
                continue;
            }

            frames.pop();
            if let Some(&(parent, _)) = frames.last() {
                lowlink[parent] = lowlink[parent].min(lowlink[node]);
            }

            if lowlink[node] == index[node] {
                let mut component = Vec::new();
                while let Some(member) = stack.pop() {
                    on_stack[member] = false;
                    component.push(member);
                    if member == node {
                        break;
                    }
                }
                component.sort_unstable();
                components.push(component);
            }
        }
    }

    components
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acyclic_chain() {
        // 0 -> 1 -> 2
        let sccs = strongly_connected_components(&[vec![1], vec![2], vec![]]);
        assert_eq!(sccs, vec![vec![2], vec![1], vec![0]]);
    }

    #[test]
    fn test_mutual_recursion() {
        // 0 <-> 1, 1 -> 2
        let sccs = strongly_connected_components(&[vec![1], vec![0, 2], vec![]]);
        assert_eq!(sccs, vec![vec![2], vec![0, 1]]);
    }

    #[test]
    fn test_self_loop() {
        let sccs = strongly_connected_components(&[vec![0]]);
        assert_eq!(sccs, vec![vec![0]]);
    }

    #[test]
    fn test_two_cycles_joined() {
        // {0,1} -> {2,3}
        let graph = vec![vec![1], vec![0, 2], vec![3], vec![2]];
        let sccs = strongly_connected_components(&graph);
        assert_eq!(sccs, vec![vec![2, 3], vec![0, 1]]);
    }

    #[test]
    fn test_deep_chain_does_not_overflow() {
        let n = 200_000;
        let graph: Vec<Vec<usize>> = (0..n)
            .map(|i| if i + 1 < n { vec![i + 1] } else { vec![] })
            .collect();
        let sccs = strongly_connected_components(&graph);
        assert_eq!(sccs.len(), n);
        assert_eq!(sccs[0], vec![n - 1]);
    }

    #[test]
    fn test_every_node_in_exactly_one_component() {
        let graph = vec![vec![1, 2], vec![2], vec![0, 3], vec![], vec![4]];
        let mut seen: Vec<usize> = strongly_connected_components(&graph)
            .into_iter()
            .flatten()
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }
}
