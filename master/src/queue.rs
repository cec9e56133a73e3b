use common::SharedTask;
use parking_lot::RwLock;

/// Cola de tareas listas, ordenada por prioridad descendente.
/// Entre prioridades iguales el orden no está garantizado.
#[derive(Default)]
pub struct PriorityQueue {
    tasks: RwLock<Vec<SharedTask>>,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, task: SharedTask) {
        let mut tasks = self.tasks.write();
        tasks.push(task);
        tasks.sort_unstable_by(|a, b| b.priority().cmp(&a.priority()));
    }

    /// Saca la tarea de mayor prioridad, si hay.
    pub fn pop(&self) -> Option<SharedTask> {
        let mut tasks = self.tasks.write();
        if tasks.is_empty() {
            None
        } else {
            Some(tasks.remove(0))
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::{Task, TaskContext, TaskOutput};
    use std::sync::Arc;

    struct Prio(&'static str, i32);

    #[async_trait]
    impl Task for Prio {
        async fn execute(&self, _ctx: TaskContext) -> anyhow::Result<TaskOutput> {
            Ok(None)
        }

        fn id(&self) -> &str {
            self.0
        }

        fn priority(&self) -> i32 {
            self.1
        }
    }

    #[test]
    fn mayor_prioridad_sale_primero() {
        let queue = PriorityQueue::new();
        queue.push(Arc::new(Prio("baja", 1)));
        queue.push(Arc::new(Prio("alta", 10)));
        queue.push(Arc::new(Prio("media", 5)));
        queue.push(Arc::new(Prio("negativa", -3)));

        let order: Vec<String> = std::iter::from_fn(|| queue.pop())
            .map(|t| t.id().to_string())
            .collect();
        assert_eq!(order, vec!["alta", "media", "baja", "negativa"]);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn prioridades_iguales_salen_antes_que_las_menores() {
        let queue = PriorityQueue::new();
        queue.push(Arc::new(Prio("a", 2)));
        queue.push(Arc::new(Prio("b", 2)));
        queue.push(Arc::new(Prio("c", 0)));
        assert_eq!(queue.len(), 3);

        let first: Vec<i32> = (0..2).filter_map(|_| queue.pop()).map(|t| t.priority()).collect();
        assert_eq!(first, vec![2, 2]);
        assert_eq!(queue.pop().map(|t| t.id().to_string()).as_deref(), Some("c"));
        assert!(queue.is_empty());
    }

    #[test]
    fn prioridades_nunca_suben_al_sacar() {
        let mut sequences: Vec<Vec<i32>> = vec![
            vec![],
            vec![7],
            vec![0, 0, 0, 0],
            vec![-5, 3, -5, 3, 0, -1, 3],
            vec![i32::MIN, i32::MAX, 0, i32::MIN, i32::MAX],
        ];
        // secuencias pseudoaleatorias con repetidos y negativos
        let mut seed: u32 = 12345;
        for len in [10, 37, 100] {
            let seq = (0..len)
                .map(|_| {
                    seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                    ((seed >> 16) % 21) as i32 - 10
                })
                .collect();
            sequences.push(seq);
        }

        for seq in sequences {
            let queue = PriorityQueue::new();
            for &p in &seq {
                queue.push(Arc::new(Prio("t", p)));
            }

            let popped: Vec<i32> = std::iter::from_fn(|| queue.pop())
                .map(|t| t.priority())
                .collect();
            assert_eq!(popped.len(), seq.len());
            assert!(
                popped.windows(2).all(|w| w[0] >= w[1]),
                "orden roto para {seq:?}: {popped:?}"
            );

            let mut expected = seq.clone();
            expected.sort_unstable_by(|a, b| b.cmp(a));
            assert_eq!(popped, expected);
        }
    }
}
