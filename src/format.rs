//! Output formatting for the command line: JSON or an indented text tree.

use crate::types::{Activity, Task};
use std::collections::{HashMap, HashSet};

/// Output format for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Json,
    Tree,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "tree" | "text" => Ok(OutputFormat::Tree),
            _ => Err(format!("Invalid format '{}'. Valid options: json, tree", s)),
        }
    }
}

/// One line summary of a task and its rollups.
pub fn format_task_line(task: &Task) -> String {
    let mut line = format!("{} [{}]", task.name, task.id);
    if task.is_parallel {
        line.push_str(" parallel");
    }
    line.push_str(&format!(
        " min={} est={}+{} logged={}+{} exp={}+{} children={} descendants={}",
        task.minimum_time,
        task.estimated_time,
        task.estimated_sub_time,
        task.logged_time,
        task.logged_sub_time,
        task.estimated_expense,
        task.estimated_sub_expense,
        task.child_count,
        task.descendant_count,
    ));
    if let Some(ref user) = task.user {
        line.push_str(&format!(" @{}", user));
    }
    line
}

/// Format a flat list of tasks, one per line.
pub fn format_task_list(tasks: &[Task]) -> String {
    let mut out = String::new();
    for task in tasks {
        out.push_str(&format_task_line(task));
        out.push('\n');
    }
    out
}

/// Render the subtree under `root` in sibling order, indented by depth.
///
/// Nodes reached twice are printed once with a marker, so corrupt pointer
/// data still renders.
pub fn format_tree(tasks: &HashMap<String, Task>, root: &str) -> String {
    let mut out = String::new();
    let mut seen = HashSet::new();
    render_node(tasks, root, 0, &mut seen, &mut out);
    out
}

fn render_node(
    tasks: &HashMap<String, Task>,
    id: &str,
    depth: usize,
    seen: &mut HashSet<String>,
    out: &mut String,
) {
    let indent = "  ".repeat(depth);
    let Some(task) = tasks.get(id) else {
        out.push_str(&format!("{}<missing {}>\n", indent, id));
        return;
    };
    if !seen.insert(id.to_string()) {
        out.push_str(&format!("{}<revisited {}>\n", indent, id));
        return;
    }

    out.push_str(&indent);
    out.push_str(&format_task_line(task));
    out.push('\n');

    let mut child = task.first_child.clone();
    while let Some(child_id) = child {
        if seen.contains(&child_id) {
            out.push_str(&format!("{}  <revisited {}>\n", indent, child_id));
            break;
        }
        render_node(tasks, &child_id, depth + 1, seen, out);
        child = tasks.get(&child_id).and_then(|t| t.next_sibling.clone());
    }
}

/// Format activity entries, newest first as given.
pub fn format_activities(activities: &[Activity]) -> String {
    let mut out = String::new();
    for a in activities {
        out.push_str(&format!(
            "#{} {} {} {} {} {}",
            a.seq,
            a.occurred_on,
            a.actor,
            a.action.as_str(),
            a.item_type.as_str(),
            a.item_name.as_deref().unwrap_or(&a.item),
        ));
        if a.item_has_been_deleted {
            out.push_str(" (deleted)");
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, parent: Option<&str>, first_child: Option<&str>, next: Option<&str>) -> Task {
        Task {
            id: id.to_string(),
            parent: parent.map(String::from),
            first_child: first_child.map(String::from),
            next_sibling: next.map(String::from),
            user: None,
            name: id.to_uppercase(),
            description: None,
            created_by: "host".to_string(),
            created_on: 0,
            minimum_time: 0,
            estimated_time: 0,
            logged_time: 0,
            estimated_expense: 0,
            logged_expense: 0,
            file_count: 0,
            file_size: 0,
            estimated_sub_time: 0,
            logged_sub_time: 0,
            estimated_sub_expense: 0,
            logged_sub_expense: 0,
            file_sub_count: 0,
            file_sub_size: 0,
            child_count: 0,
            descendant_count: 0,
            is_parallel: false,
        }
    }

    fn tree_of(tasks: Vec<Task>) -> HashMap<String, Task> {
        tasks.into_iter().map(|t| (t.id.clone(), t)).collect()
    }

    #[test]
    fn parses_formats() {
        assert_eq!("JSON".parse::<OutputFormat>(), Ok(OutputFormat::Json));
        assert_eq!("tree".parse::<OutputFormat>(), Ok(OutputFormat::Tree));
        assert!("yaml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn renders_children_in_sibling_order() {
        let tasks = tree_of(vec![
            task("p", None, Some("b"), None),
            task("a", Some("p"), None, None),
            task("b", Some("p"), Some("c"), Some("a")),
            task("c", Some("b"), None, None),
        ]);
        let out = format_tree(&tasks, "p");
        let names: Vec<&str> = out
            .lines()
            .map(|l| l.trim_start().split(' ').next().unwrap_or(""))
            .collect();
        assert_eq!(names, vec!["P", "B", "C", "A"]);
        assert!(out.lines().nth(2).unwrap().starts_with("    C"));
    }

    #[test]
    fn sibling_loop_is_marked_not_followed() {
        let tasks = tree_of(vec![
            task("p", None, Some("a"), None),
            task("a", Some("p"), None, Some("b")),
            task("b", Some("p"), None, Some("a")),
        ]);
        let out = format_tree(&tasks, "p");
        assert_eq!(out.lines().count(), 4);
        assert!(out.contains("<revisited a>"));
    }

    #[test]
    fn missing_child_is_reported() {
        let tasks = tree_of(vec![task("p", None, Some("ghost"), None)]);
        assert!(format_tree(&tasks, "p").contains("<missing ghost>"));
    }
}
