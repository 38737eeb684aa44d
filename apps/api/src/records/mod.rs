// Persistence collaborator: keyed get/put/update of analysis records and
// payment sessions, with conditional status transitions.

pub mod analyses;
pub mod sessions;
