//! Snapshot sub-commands and their dispatch table.

use std::{
    collections::BTreeMap,
    io::Write,
    ops::RangeInclusive,
    path::{Path, PathBuf},
};

use anyhow::{Context, anyhow, bail};
use async_trait::async_trait;
use qsnap_client::{LogObserver, SnapshotClient};
use qsnap_core::{CommandChannel, SnapshotError};

/// Command namespace word, accepted in front of any sub-command.
pub const NAMESPACE: &str = "snapshot";

/// State shared by all commands of one front end.
pub struct Session<C> {
    pub client: SnapshotClient<C>,
    /// Extension of snapshot files written by `save`.
    pub extension: String,
}

impl<C: CommandChannel> Session<C> {
    #[must_use]
    pub fn new(client: SnapshotClient<C>, extension: impl Into<String>) -> Self {
        Self {
            client,
            extension: extension.into(),
        }
    }
}

/// Output sink for command results.
pub type Output<'a> = &'a mut (dyn Write + Send);

/// A snapshot sub-command.
#[async_trait]
pub trait SnapshotCommand<C: CommandChannel>: Send + Sync {
    /// Argument synopsis.
    fn usage(&self) -> &'static str;

    /// One-line description.
    fn summary(&self) -> &'static str;

    /// Accepted argument counts.
    fn arity(&self) -> RangeInclusive<usize>;

    /// Run with already tokenized, arity-checked arguments.
    async fn invoke(
        &self,
        session: &mut Session<C>,
        args: &[String],
        out: Output<'_>,
    ) -> anyhow::Result<()>;
}

/// Table mapping sub-command names to handlers.
pub struct CommandTable<C> {
    commands: BTreeMap<&'static str, Box<dyn SnapshotCommand<C>>>,
}

impl<C: CommandChannel> Default for CommandTable<C> {
    fn default() -> Self {
        Self {
            commands: BTreeMap::new(),
        }
    }
}

impl<C: CommandChannel> CommandTable<C> {
    /// Table with the six snapshot commands.
    #[must_use]
    pub fn snapshot_commands() -> Self {
        let mut table = Self::default();
        table.register("info", Box::new(InfoCommand));
        table.register("create", Box::new(CreateCommand));
        table.register("restore", Box::new(RestoreCommand));
        table.register("delete", Box::new(DeleteCommand));
        table.register("save", Box::new(SaveCommand));
        table.register("load", Box::new(LoadCommand));
        table
    }

    /// Add or replace a command.
    pub fn register(&mut self, name: &'static str, command: Box<dyn SnapshotCommand<C>>) {
        self.commands.insert(name, command);
    }

    /// Registered command names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.commands.keys().copied()
    }

    /// Run one tokenized command line. An empty line does nothing.
    ///
    /// # Errors
    /// Returns error for unknown commands, wrong argument counts and any
    /// failure of the command itself.
    pub async fn dispatch(
        &self,
        session: &mut Session<C>,
        tokens: &[String],
        out: Output<'_>,
    ) -> anyhow::Result<()> {
        let tokens = match tokens.split_first() {
            Some((first, rest)) if first == NAMESPACE => rest,
            _ => tokens,
        };
        let Some((name, args)) = tokens.split_first() else {
            return Ok(());
        };

        if name == "help" {
            return self.write_help(out);
        }

        let command = self.commands.get(name.as_str()).ok_or_else(|| {
            let known: Vec<_> = self.names().collect();
            anyhow!("Unknown command {name:?}, expected one of: {}", known.join(", "))
        })?;
        if !command.arity().contains(&args.len()) {
            bail!("Usage: {NAMESPACE} {name} {}", command.usage());
        }

        tracing::debug!(command = %name, ?args, "Dispatching");
        command.invoke(session, args, out).await
    }

    fn write_help(&self, out: Output<'_>) -> anyhow::Result<()> {
        for (name, command) in &self.commands {
            let synopsis = format!("{name} {}", command.usage());
            writeln!(out, "  {:<28} {}", synopsis.trim_end(), command.summary())?;
        }
        Ok(())
    }
}

/// Split an input line with POSIX shell quoting rules.
///
/// # Errors
/// Returns error on unbalanced quotes.
pub fn tokenize(line: &str) -> anyhow::Result<Vec<String>> {
    shlex::split(line).ok_or_else(|| anyhow!("Unbalanced quotes in {line:?}"))
}

struct InfoCommand;

#[async_trait]
impl<C: CommandChannel> SnapshotCommand<C> for InfoCommand {
    fn usage(&self) -> &'static str {
        ""
    }

    fn summary(&self) -> &'static str {
        "List the snapshots held by the target"
    }

    fn arity(&self) -> RangeInclusive<usize> {
        0..=0
    }

    async fn invoke(
        &self,
        session: &mut Session<C>,
        _args: &[String],
        out: Output<'_>,
    ) -> anyhow::Result<()> {
        let catalog = session.client.list_snapshots().await?;
        writeln!(out, "\nOffset (PC): Name")?;
        writeln!(out, "-----------------")?;
        for (name, offset) in catalog.iter() {
            writeln!(out, "{offset:#x}: {name}")?;
        }
        writeln!(out)?;
        Ok(())
    }
}

struct CreateCommand;

#[async_trait]
impl<C: CommandChannel> SnapshotCommand<C> for CreateCommand {
    fn usage(&self) -> &'static str {
        "[name]"
    }

    fn summary(&self) -> &'static str {
        "Create a snapshot from the current state"
    }

    fn arity(&self) -> RangeInclusive<usize> {
        0..=1
    }

    async fn invoke(
        &self,
        session: &mut Session<C>,
        args: &[String],
        out: Output<'_>,
    ) -> anyhow::Result<()> {
        let name = session
            .client
            .create_snapshot(args.first().map(String::as_str))
            .await
            .context("Snapshot creation failed")?;
        writeln!(out, "Created snapshot {name}")?;
        Ok(())
    }
}

struct RestoreCommand;

#[async_trait]
impl<C: CommandChannel> SnapshotCommand<C> for RestoreCommand {
    fn usage(&self) -> &'static str {
        "<name>"
    }

    fn summary(&self) -> &'static str {
        "Restore the current state to a snapshot"
    }

    fn arity(&self) -> RangeInclusive<usize> {
        1..=1
    }

    async fn invoke(
        &self,
        session: &mut Session<C>,
        args: &[String],
        out: Output<'_>,
    ) -> anyhow::Result<()> {
        let name = &args[0];
        session
            .client
            .restore_snapshot(name)
            .await
            .context("Restoring snapshot failed")?;
        writeln!(out, "Restored snapshot {name}")?;
        Ok(())
    }
}

struct DeleteCommand;

#[async_trait]
impl<C: CommandChannel> SnapshotCommand<C> for DeleteCommand {
    fn usage(&self) -> &'static str {
        "<name>"
    }

    fn summary(&self) -> &'static str {
        "Delete a snapshot"
    }

    fn arity(&self) -> RangeInclusive<usize> {
        1..=1
    }

    async fn invoke(
        &self,
        session: &mut Session<C>,
        args: &[String],
        out: Output<'_>,
    ) -> anyhow::Result<()> {
        let name = &args[0];
        session
            .client
            .delete_snapshot(name)
            .await
            .context("Deleting snapshot failed")?;
        writeln!(out, "Deleted snapshot {name}")?;
        Ok(())
    }
}

struct SaveCommand;

#[async_trait]
impl<C: CommandChannel> SnapshotCommand<C> for SaveCommand {
    fn usage(&self) -> &'static str {
        "<name> [path]"
    }

    fn summary(&self) -> &'static str {
        "Save a snapshot to a file"
    }

    fn arity(&self) -> RangeInclusive<usize> {
        1..=2
    }

    async fn invoke(
        &self,
        session: &mut Session<C>,
        args: &[String],
        out: Output<'_>,
    ) -> anyhow::Result<()> {
        let name = &args[0];
        if !session.client.list_snapshots().await?.contains(name) {
            return Err(SnapshotError::NotFound(name.clone()).into());
        }
        let path = save_path(name, args.get(1).map(Path::new), &session.extension)?;

        let blob = session
            .client
            .save_snapshot(name)
            .await
            .context("Saving snapshot failed")?;
        tokio::fs::write(&path, &blob)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        writeln!(out, "Saved snapshot {name} to {}", path.display())?;
        Ok(())
    }
}

struct LoadCommand;

#[async_trait]
impl<C: CommandChannel> SnapshotCommand<C> for LoadCommand {
    fn usage(&self) -> &'static str {
        "<path> [name]"
    }

    fn summary(&self) -> &'static str {
        "Load a snapshot from a file"
    }

    fn arity(&self) -> RangeInclusive<usize> {
        1..=2
    }

    async fn invoke(
        &self,
        session: &mut Session<C>,
        args: &[String],
        out: Output<'_>,
    ) -> anyhow::Result<()> {
        let path = Path::new(&args[0]);
        if !path.is_file() {
            bail!("Snapshot file {} doesn't exist!", path.display());
        }
        let blob = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let name = session
            .client
            .load_snapshot_with(&blob, args.get(1).map(String::as_str), &mut LogObserver::default())
            .await
            .context("Loading snapshot failed")?;

        writeln!(out, "Loaded snapshot {name} from {}", path.display())?;
        Ok(())
    }
}

/// Where `save` writes: `./<name>.<ext>` by default, inside `path` when it
/// is a directory, `path` itself otherwise. The parent directory must exist.
fn save_path(name: &str, path: Option<&Path>, extension: &str) -> anyhow::Result<PathBuf> {
    let file_name = format!("{name}.{extension}");
    let Some(path) = path else {
        return Ok(Path::new(".").join(file_name));
    };
    if path.is_dir() {
        return Ok(path.join(file_name));
    }

    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    if !parent.is_dir() {
        bail!("Directory {} does not exist!", parent.display());
    }
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use qsnap_core::ErrorKind;
    use qsnap_transport::MemoryTarget;

    use super::*;

    fn session() -> Session<MemoryTarget> {
        Session::new(SnapshotClient::new(MemoryTarget::with_state(vec![9; 3000])), "qsp")
    }

    async fn run(
        table: &CommandTable<MemoryTarget>,
        session: &mut Session<MemoryTarget>,
        line: &str,
    ) -> anyhow::Result<String> {
        let mut out = Vec::new();
        table.dispatch(session, &tokenize(line)?, &mut out).await?;
        Ok(String::from_utf8(out)?)
    }

    #[tokio::test]
    async fn test_create_info_restore() {
        let table = CommandTable::snapshot_commands();
        let mut session = session();
        session.client.channel_mut().set_pc(0x40_1000);

        let out = run(&table, &mut session, "snapshot create alpha").await.unwrap();
        assert_eq!(out, "Created snapshot alpha\n");

        let out = run(&table, &mut session, "info").await.unwrap();
        assert_eq!(out, "\nOffset (PC): Name\n-----------------\n0x401000: alpha\n\n");

        let out = run(&table, &mut session, "restore alpha").await.unwrap();
        assert_eq!(out, "Restored snapshot alpha\n");

        let err = run(&table, &mut session, "restore missing").await.unwrap_err();
        let kind = err.downcast_ref::<SnapshotError>().map(SnapshotError::kind);
        assert_eq!(kind, Some(ErrorKind::NotFound));
    }

    #[tokio::test]
    async fn test_save_then_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let table = CommandTable::snapshot_commands();
        let mut session = session();
        session.client.channel_mut().set_pc(0x1234);
        run(&table, &mut session, "create alpha").await.unwrap();

        // A directory argument gets the default file name appended.
        let line = format!("save alpha '{}'", dir.path().display());
        let out = run(&table, &mut session, &line).await.unwrap();
        let file = dir.path().join("alpha.qsp");
        assert_eq!(out, format!("Saved snapshot alpha to {}\n", file.display()));
        assert!(file.is_file());

        let line = format!("load '{}' beta", file.display());
        let out = run(&table, &mut session, &line).await.unwrap();
        assert_eq!(out, format!("Loaded snapshot beta from {}\n", file.display()));

        let catalog = session.client.list_snapshots().await.unwrap();
        assert_eq!(catalog.get("beta"), Some(0x1234));
    }

    #[tokio::test]
    async fn test_save_unknown_name_before_path() {
        let dir = tempfile::tempdir().unwrap();
        let table = CommandTable::snapshot_commands();
        let mut session = session();

        let line = format!("save missing '{}'", dir.path().join("absent").join("x").display());
        let err = run(&table, &mut session, &line).await.unwrap_err();
        let kind = err.downcast_ref::<SnapshotError>().map(SnapshotError::kind);
        assert_eq!(kind, Some(ErrorKind::NotFound));
        assert_eq!(session.client.channel().history(), ["snapshot;info"]);
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let table = CommandTable::snapshot_commands();
        let mut session = session();

        let line = format!("load '{}'", dir.path().join("absent.qsp").display());
        let err = run(&table, &mut session, &line).await.unwrap_err();
        assert!(err.to_string().contains("doesn't exist"));
        assert!(session.client.channel().history().is_empty());
    }

    #[tokio::test]
    async fn test_usage_and_unknown() {
        let table = CommandTable::snapshot_commands();
        let mut session = session();

        let err = run(&table, &mut session, "restore").await.unwrap_err();
        assert_eq!(err.to_string(), "Usage: snapshot restore <name>");

        let err = run(&table, &mut session, "save a b c").await.unwrap_err();
        assert_eq!(err.to_string(), "Usage: snapshot save <name> [path]");

        let err = run(&table, &mut session, "frobnicate").await.unwrap_err();
        assert!(err.to_string().contains("Unknown command"));

        assert_eq!(run(&table, &mut session, "").await.unwrap(), "");
        assert_eq!(run(&table, &mut session, "snapshot").await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_help_lists_table() {
        let table = CommandTable::snapshot_commands();
        let mut session = session();
        let out = run(&table, &mut session, "help").await.unwrap();
        for name in table.names() {
            assert!(out.contains(name), "{name} missing from help");
        }
    }

    #[test]
    fn test_save_path() {
        let dir = tempfile::tempdir().unwrap();

        assert_eq!(save_path("a", None, "qsp").unwrap(), Path::new("./a.qsp"));
        assert_eq!(
            save_path("a", Some(dir.path()), "qsp").unwrap(),
            dir.path().join("a.qsp")
        );

        let explicit = dir.path().join("out.bin");
        assert_eq!(save_path("a", Some(&explicit), "qsp").unwrap(), explicit);
        assert_eq!(
            save_path("a", Some(Path::new("out.bin")), "qsp").unwrap(),
            Path::new("out.bin")
        );

        let nested = dir.path().join("missing").join("out.bin");
        assert!(save_path("a", Some(&nested), "qsp").is_err());
    }

    #[test]
    fn test_tokenize_quotes() {
        assert_eq!(tokenize(r#"save "my snap" /tmp/x"#).unwrap(), ["save", "my snap", "/tmp/x"]);
        assert!(tokenize(r#"save "open"#).is_err());
    }
}
