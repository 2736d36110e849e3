//! Window-affinity filter: only handle requests for projects open here.

use std::path::Path;

use crate::types::Request;

/// Accepts a request whose project equals, contains, or is contained in one
/// of the workspace roots. Requests without a project are left for others.
#[derive(Debug, Clone, Default)]
pub struct ProjectAffinity {
    roots: Vec<String>,
}

impl ProjectAffinity {
    pub fn new<I, P>(roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        ProjectAffinity {
            roots: roots
                .into_iter()
                .map(|root| normalize_path_for_matching(&root.as_ref().to_string_lossy()))
                .collect(),
        }
    }

    pub fn accepts(&self, request: &Request) -> bool {
        let Some(project) = request
            .project
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
        else {
            return false;
        };
        let project = normalize_path_for_matching(project);

        self.roots.iter().any(|root| {
            project == *root
                || is_nested(&project, root)
                || is_nested(root, &project)
        })
    }
}

fn is_nested(child: &str, parent: &str) -> bool {
    if parent == "/" {
        return child != "/" && child.starts_with('/');
    }
    child
        .strip_prefix(parent)
        .is_some_and(|rest| rest.starts_with('/'))
}

/// Forward slashes, no trailing slash (except root), case-folded on macOS.
pub fn normalize_path_for_matching(path: &str) -> String {
    let forward = path.replace('\\', "/");
    let trimmed = forward.trim_end_matches('/');
    let trimmed = if trimmed.is_empty() && forward.starts_with('/') {
        "/"
    } else {
        trimmed
    };
    apply_case_normalization(trimmed)
}

#[cfg(target_os = "macos")]
fn apply_case_normalization(path: &str) -> String {
    path.to_lowercase()
}

#[cfg(not(target_os = "macos"))]
fn apply_case_normalization(path: &str) -> String {
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_for(project: Option<&str>) -> Request {
        let mut request = Request::stub("r1");
        request.project = project.map(str::to_string);
        request
    }

    #[test]
    fn test_exact_child_and_parent_match() {
        let filter = ProjectAffinity::new(["/work/app/"]);
        assert!(filter.accepts(&request_for(Some("/work/app"))));
        assert!(filter.accepts(&request_for(Some("/work/app/src"))));
        assert!(filter.accepts(&request_for(Some("/work"))));
    }

    #[test]
    fn test_sibling_prefix_does_not_match() {
        let filter = ProjectAffinity::new(["/work/app"]);
        assert!(!filter.accepts(&request_for(Some("/work/app2"))));
        assert!(!filter.accepts(&request_for(Some("/other"))));
    }

    #[test]
    fn test_missing_project_is_rejected() {
        let filter = ProjectAffinity::new(["/work/app"]);
        assert!(!filter.accepts(&request_for(None)));
        assert!(!filter.accepts(&request_for(Some("  "))));
    }

    #[test]
    fn test_no_roots_rejects_everything() {
        let filter = ProjectAffinity::default();
        assert!(!filter.accepts(&request_for(Some("/work/app"))));
    }

    #[test]
    fn test_normalize_path_for_matching() {
        assert_eq!(normalize_path_for_matching("/"), "/");
        assert_eq!(normalize_path_for_matching("///"), "/");
        assert_eq!(normalize_path_for_matching("C:\\code\\app\\"), apply_case_normalization("C:/code/app"));
    }
}
