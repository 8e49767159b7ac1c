//! CLI command definitions for task-tree
//!
//! This module defines the CLI structure using clap's derive macros and
//! dispatches each subcommand to the database layer. Handlers return the
//! text to print so they can be exercised without a terminal.

use crate::db::Database;
use crate::format::{OutputFormat, format_activities, format_task_line, format_task_list, format_tree};
use crate::types::{ActivityFilter, CreateTask, ProjectKey, Role, UpdateTask};
use anyhow::{Result, anyhow};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

/// Ordered task tree engine
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Path to database file (overrides config)
    #[arg(short, long, global = true)]
    pub database: Option<String>,

    /// User to act as
    #[arg(long = "as", env = "TASK_TREE_USER", default_value = "local", global = true)]
    pub actor: String,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Logging output: 0/off, 1/stdout, 2/stderr (default), or filename
    #[arg(short, long, default_value = "2", global = true)]
    pub log: String,

    /// Output format: json (default) or tree
    #[arg(short, long, default_value = "json", global = true)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create, delete and share projects
    #[command(subcommand)]
    Project(ProjectCommand),

    /// Create, move, edit, delete and inspect tasks
    #[command(subcommand)]
    Task(TaskCommand),

    /// Log time against a task
    #[command(subcommand)]
    Time(EntryCommand),

    /// Log an expense against a task
    #[command(subcommand)]
    Expense(EntryCommand),

    /// List a project's activity, newest first
    Activities(ActivitiesArgs),
}

/// Which project to operate on. The host defaults to the acting user.
#[derive(Args, Debug, Clone)]
pub struct ProjectArgs {
    /// Project id
    #[arg(short, long)]
    pub project: String,

    /// Owning host (defaults to --as)
    #[arg(long)]
    pub host: Option<String>,
}

impl ProjectArgs {
    fn key(&self, actor: &str) -> ProjectKey {
        ProjectKey::new(self.host.as_deref().unwrap_or(actor), self.project.clone())
    }
}

#[derive(Subcommand, Debug)]
pub enum ProjectCommand {
    /// Create a project owned by the acting user
    Create {
        name: String,
        /// Allow anyone to read the project
        #[arg(long)]
        public: bool,
    },
    /// Delete a project and everything in it
    Delete {
        #[command(flatten)]
        project: ProjectArgs,
    },
    /// Add a member or change their role
    AddUser {
        #[command(flatten)]
        project: ProjectArgs,
        user: String,
        /// admin, writer or reader
        #[arg(long, default_value = "writer")]
        role: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum TaskCommand {
    /// Create a task
    Create(CreateArgs),
    /// Move or edit a task
    Update(UpdateArgs),
    /// Delete a task and its subtree
    Delete {
        #[command(flatten)]
        project: ProjectArgs,
        id: String,
    },
    /// Show one or more tasks
    Get {
        #[command(flatten)]
        project: ProjectArgs,
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Show a task's ancestors, nearest first
    Ancestors {
        #[command(flatten)]
        project: ProjectArgs,
        id: String,
        /// Start above this ancestor
        #[arg(long)]
        after: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show a task's children in order
    Children {
        #[command(flatten)]
        project: ProjectArgs,
        id: String,
        /// Start after this child
        #[arg(long)]
        after: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show the whole project tree
    Tree {
        #[command(flatten)]
        project: ProjectArgs,
    },
}

#[derive(Args, Debug)]
pub struct CreateArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    /// Parent task (defaults to the project root)
    #[arg(long)]
    pub parent: Option<String>,

    /// Insert after this sibling instead of first
    #[arg(long)]
    pub after: Option<String>,

    pub name: String,

    #[arg(long)]
    pub description: Option<String>,

    /// Children run in parallel
    #[arg(long)]
    pub parallel: bool,

    /// Assignee
    #[arg(long)]
    pub user: Option<String>,

    #[arg(long, default_value_t = 0)]
    pub estimated_time: i64,

    #[arg(long, default_value_t = 0)]
    pub estimated_expense: i64,
}

#[derive(Args, Debug)]
pub struct UpdateArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    pub id: String,

    /// Move under this parent
    #[arg(long)]
    pub parent: Option<String>,

    /// Place after this sibling
    #[arg(long, conflicts_with = "first")]
    pub after: Option<String>,

    /// Place first among its siblings
    #[arg(long)]
    pub first: bool,

    #[arg(long)]
    pub name: Option<String>,

    /// New description; an empty value clears it
    #[arg(long)]
    pub description: Option<String>,

    #[arg(long)]
    pub parallel: Option<bool>,

    /// Assign to this user
    #[arg(long, conflicts_with = "unassign")]
    pub user: Option<String>,

    #[arg(long)]
    pub unassign: bool,

    #[arg(long)]
    pub estimated_time: Option<i64>,

    #[arg(long)]
    pub estimated_expense: Option<i64>,
}

impl UpdateArgs {
    fn to_request(&self) -> UpdateTask {
        let mut req = UpdateTask::new(self.id.clone());
        req.parent = self.parent.clone();
        req.previous_sibling = match (&self.after, self.first) {
            (Some(after), _) => Some(Some(after.clone())),
            (None, true) => Some(None),
            (None, false) => None,
        };
        req.name = self.name.clone();
        req.description = self.description.clone().map(Some);
        req.is_parallel = self.parallel;
        req.user = match (&self.user, self.unassign) {
            (Some(user), _) => Some(Some(user.clone())),
            (None, true) => Some(None),
            (None, false) => None,
        };
        req.estimated_time = self.estimated_time;
        req.estimated_expense = self.estimated_expense;
        req
    }
}

#[derive(Subcommand, Debug)]
pub enum EntryCommand {
    /// Record an amount against a task
    Log {
        #[command(flatten)]
        project: ProjectArgs,
        task: String,
        amount: i64,
        #[arg(long)]
        note: Option<String>,
    },
}

#[derive(Args, Debug)]
pub struct ActivitiesArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    /// Only entries about this item
    #[arg(long)]
    pub item: Option<String>,

    /// Only entries by this user
    #[arg(long)]
    pub by: Option<String>,

    /// Only entries after this epoch-ms timestamp
    #[arg(long)]
    pub after: Option<i64>,

    /// Only entries before this epoch-ms timestamp
    #[arg(long)]
    pub before: Option<i64>,

    #[arg(long)]
    pub limit: Option<usize>,
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

/// Run one subcommand against the database and return what to print.
pub fn execute(db: &Database, cli: &Cli) -> Result<String> {
    let actor = cli.actor.as_str();
    let tree = cli.format == OutputFormat::Tree;

    let out = match &cli.command {
        Command::Project(cmd) => match cmd {
            ProjectCommand::Create { name, public } => {
                let project = db.create_project(actor, name, *public)?;
                if tree {
                    format!("{}\n", project.id)
                } else {
                    to_json(&project)?
                }
            }
            ProjectCommand::Delete { project } => {
                db.delete_project(&project.key(actor), actor)?;
                String::new()
            }
            ProjectCommand::AddUser { project, user, role } => {
                let role = Role::parse(role).ok_or_else(|| anyhow!("unknown role '{}'", role))?;
                db.add_project_user(&project.key(actor), actor, user, role)?;
                String::new()
            }
        },

        Command::Task(cmd) => match cmd {
            TaskCommand::Create(args) => {
                let key = args.project.key(actor);
                let req = CreateTask {
                    parent: args.parent.clone().unwrap_or_else(|| key.project.clone()),
                    previous_sibling: args.after.clone(),
                    name: args.name.clone(),
                    description: args.description.clone(),
                    is_parallel: args.parallel,
                    user: args.user.clone(),
                    estimated_time: args.estimated_time,
                    estimated_expense: args.estimated_expense,
                };
                let task = db.create_task(&key, actor, req)?;
                if tree { format!("{}\n", format_task_line(&task)) } else { to_json(&task)? }
            }
            TaskCommand::Update(args) => {
                let key = args.project.key(actor);
                match db.update_task(&key, actor, args.to_request())? {
                    Some(task) if tree => format!("{}\n", format_task_line(&task)),
                    Some(task) => to_json(&task)?,
                    None if tree => "no change\n".to_string(),
                    None => "null".to_string(),
                }
            }
            TaskCommand::Delete { project, id } => {
                db.delete_task(&project.key(actor), actor, id)?;
                String::new()
            }
            TaskCommand::Get { project, ids } => {
                let tasks = db.get_tasks(&project.key(actor), Some(actor), ids)?;
                if tree { format_task_list(&tasks) } else { to_json(&tasks)? }
            }
            TaskCommand::Ancestors { project, id, after, limit } => {
                let page = db.get_ancestors(
                    &project.key(actor),
                    Some(actor),
                    id,
                    after.as_deref(),
                    *limit,
                )?;
                if tree { format_task_list(&page.set) } else { to_json(&page)? }
            }
            TaskCommand::Children { project, id, after, limit } => {
                let page = db.get_children(
                    &project.key(actor),
                    Some(actor),
                    id,
                    after.as_deref(),
                    *limit,
                )?;
                if tree { format_task_list(&page.set) } else { to_json(&page)? }
            }
            TaskCommand::Tree { project } => {
                let key = project.key(actor);
                let tasks = db.get_project_tree(&key, Some(actor))?;
                if tree { format_tree(&tasks, &key.project) } else { to_json(&tasks)? }
            }
        },

        Command::Time(EntryCommand::Log { project, task, amount, note }) => {
            let entry = db.log_time(&project.key(actor), actor, task, *amount, note.clone())?;
            to_json(&entry)?
        }

        Command::Expense(EntryCommand::Log { project, task, amount, note }) => {
            let entry = db.log_expense(&project.key(actor), actor, task, *amount, note.clone())?;
            to_json(&entry)?
        }

        Command::Activities(args) => {
            let filter = ActivityFilter {
                item: args.item.clone(),
                actor: args.by.clone(),
                occurred_after: args.after,
                occurred_before: args.before,
                limit: args.limit,
            };
            let page = db.get_activities(&args.project.key(actor), Some(actor), &filter)?;
            if tree { format_activities(&page.set) } else { to_json(&page)? }
        }
    };

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["task-tree"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn update_flags_map_to_request() {
        let cli = parse(&["task", "update", "-p", "proj", "t1", "--first", "--unassign"]);
        let Command::Task(TaskCommand::Update(args)) = cli.command else {
            panic!("expected task update");
        };
        let req = args.to_request();
        assert_eq!(req.previous_sibling, Some(None));
        assert_eq!(req.user, Some(None));
        assert_eq!(req.name, None);
    }

    #[test]
    fn after_and_first_conflict() {
        let argv = ["task-tree", "task", "update", "-p", "proj", "t1", "--first", "--after", "t2"];
        assert!(Cli::try_parse_from(argv).is_err());
    }

    #[test]
    fn create_and_read_through_cli() {
        let db = Database::open_in_memory().unwrap();
        let out = execute(&db, &parse(&["--as", "ann", "project", "create", "Plan"])).unwrap();
        let project: serde_json::Value = serde_json::from_str(&out).unwrap();
        let project_id = project["id"].as_str().unwrap().to_string();

        execute(
            &db,
            &parse(&["--as", "ann", "task", "create", "-p", &project_id, "Design", "--estimated-time", "3"]),
        )
        .unwrap();

        let out = execute(
            &db,
            &parse(&["--as", "ann", "--format", "tree", "task", "tree", "-p", &project_id]),
        )
        .unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Plan"));
        assert!(lines[1].trim_start().starts_with("Design"));
    }
}
