use std::collections::HashSet;

/// Plan rooms the client wants to be in, in join order.
///
/// `emitted` tracks which of them already had a join sent on the current
/// connection epoch, so a replay never sends the same join twice.
#[derive(Debug, Default)]
pub struct RoomSubscriptions {
    plans: Vec<String>,
    emitted: HashSet<String>,
}

impl RoomSubscriptions {
    /// Returns false when the plan was already subscribed.
    pub fn insert(&mut self, plan_id: &str) -> bool {
        if self.contains(plan_id) {
            return false;
        }
        self.plans.push(plan_id.to_string());
        true
    }

    pub fn remove(&mut self, plan_id: &str) -> bool {
        self.emitted.remove(plan_id);
        let before = self.plans.len();
        self.plans.retain(|p| p != plan_id);
        self.plans.len() != before
    }

    pub fn contains(&self, plan_id: &str) -> bool {
        self.plans.iter().any(|p| p == plan_id)
    }

    pub fn plans(&self) -> &[String] {
        &self.plans
    }

    /// A new connection epoch starts with nothing sent.
    pub fn begin_epoch(&mut self) {
        self.emitted.clear();
    }

    /// Marks the plan as joined on this epoch; false if that already happened.
    pub fn mark_emitted(&mut self, plan_id: &str) -> bool {
        self.contains(plan_id) && self.emitted.insert(plan_id.to_string())
    }

    /// Plans still owed a join on this epoch, in join order. They are marked
    /// as emitted; the caller must send them.
    pub fn drain_pending(&mut self) -> Vec<String> {
        let pending: Vec<String> = self
            .plans
            .iter()
            .filter(|p| !self.emitted.contains(*p))
            .cloned()
            .collect();
        self.emitted.extend(pending.iter().cloned());
        pending
    }
}
