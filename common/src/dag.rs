use std::collections::{HashMap, HashSet};

use crate::task::{SharedTask, TaskId};

/// Resultado de registrar una tarea en el grafo.
pub enum Registration {
    /// Todas sus dependencias ya terminaron: va directo a la cola.
    Ready(SharedTask),
    /// Queda esperando a estas dependencias.
    Waiting(Vec<TaskId>),
}

impl Registration {
    pub fn is_ready(&self) -> bool {
        matches!(self, Registration::Ready(_))
    }
}

/// Grafo de dependencias entre tareas.
///
/// - `dependencies`: prerequisitos declarados de cada tarea
/// - `completed`: tareas que ya produjeron un resultado
/// - `waiting`: índice inverso, dependencia -> tareas bloqueadas por ella
///
/// No detecta ciclos ni dependencias que nunca se envían: esas tareas
/// quedan esperando para siempre.
#[derive(Default)]
pub struct DependencyGraph {
    dependencies: HashMap<TaskId, Vec<TaskId>>,
    completed: HashSet<TaskId>,
    waiting: HashMap<TaskId, Vec<SharedTask>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registra `task` con sus dependencias. Las repetidas se cuentan una vez.
    pub fn register(&mut self, task: SharedTask, deps: &[TaskId]) -> Registration {
        let task_id = task.id().to_string();

        let mut unique: Vec<TaskId> = Vec::with_capacity(deps.len());
        for dep in deps {
            if !unique.contains(dep) {
                unique.push(dep.clone());
            }
        }

        let pending: Vec<TaskId> = unique
            .iter()
            .filter(|d| !self.completed.contains(*d))
            .cloned()
            .collect();

        if !unique.is_empty() {
            self.dependencies.insert(task_id, unique);
        }

        if pending.is_empty() {
            return Registration::Ready(task);
        }

        for dep in &pending {
            self.waiting
                .entry(dep.clone())
                .or_default()
                .push(task.clone());
        }
        Registration::Waiting(pending)
    }

    /// `true` si todas las dependencias declaradas de `task_id` terminaron.
    pub fn can_schedule(&self, task_id: &str) -> bool {
        match self.dependencies.get(task_id) {
            None => true,
            Some(deps) => deps.iter().all(|d| self.completed.contains(d)),
        }
    }

    /// Marca `task_id` como terminada y devuelve las tareas que quedaron
    /// listas por eso. Cada tarea se libera una sola vez: sólo la
    /// dependencia que termina última la encuentra lista.
    pub fn complete(&mut self, task_id: &str) -> Vec<SharedTask> {
        self.completed.insert(task_id.to_string());

        let Some(blocked) = self.waiting.remove(task_id) else {
            return Vec::new();
        };

        blocked
            .into_iter()
            .filter(|t| self.can_schedule(t.id()))
            .collect()
    }

    pub fn is_completed(&self, task_id: &str) -> bool {
        self.completed.contains(task_id)
    }

    pub fn dependencies_of(&self, task_id: &str) -> Option<&[TaskId]> {
        self.dependencies.get(task_id).map(Vec::as_slice)
    }

    /// Cantidad de dependencias con tareas bloqueadas.
    pub fn waiting_count(&self) -> usize {
        self.waiting.len()
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    pub fn dependency_count(&self) -> usize {
        self.dependencies.len()
    }
}
