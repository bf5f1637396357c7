//! Namespace naming (spec.md §6 "Namespace per project"). Per-object names inside a
//! namespace are the shared `orchestrator::names` conventions; this covers only the
//! namespace itself, which is local to the worker.

pub fn project_namespace(organization_id: &str, project_id: &str) -> String {
    format!("{organization_id}-{project_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_name_joins_organization_and_project() {
        assert_eq!(project_namespace("acme", "blog"), "acme-blog");
    }
}
