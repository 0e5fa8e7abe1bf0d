//! Undo log: a stack of reversible commands.
//!
//! A [`Command`] carries everything needed to reverse one mutation of one key:
//! the document the mutation installed, the document it displaced (and the tier
//! that document lived in) and the keys demoted to make room. Reversal runs
//! against an [`UndoTarget`], so commands never hold references into the store.

use crate::document::{Document, DocumentKey};
use crate::error::DocResult;

/// LIFO stack with removal of the most recent matching entry.
#[derive(Debug, Clone)]
pub struct UndoStack<T> {
    entries: Vec<T>,
}

impl<T> UndoStack<T> {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn push(&mut self, entry: T) {
        self.entries.push(entry);
    }

    pub fn pop(&mut self) -> Option<T> {
        self.entries.pop()
    }

    pub fn peek(&self) -> Option<&T> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove the topmost entry matching `pred`; the others keep their order.
    pub fn remove_latest<F>(&mut self, mut pred: F) -> Option<T>
    where
        F: FnMut(&T) -> bool,
    {
        let position = self.entries.iter().rposition(|entry| pred(entry))?;
        Some(self.entries.remove(position))
    }
}

impl<T> Default for UndoStack<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A displaced document and whether it was resident when displaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prior {
    pub document: Document,
    pub resident: bool,
}

/// The store-side operations a command needs to reverse itself.
pub trait UndoTarget {
    /// Remove `doc` (installed by the command being undone) from every structure.
    fn uninstall(&mut self, doc: &Document) -> DocResult<()>;

    /// Bring a document demoted by the command back into memory, if still demoted.
    fn repromote(&mut self, key: &DocumentKey) -> DocResult<()>;

    /// Put a displaced document back in the tier it came from.
    fn reinstall(&mut self, prior: Prior) -> DocResult<()>;
}

#[derive(Debug, Clone)]
enum Reversal {
    /// The mutation changed nothing
    Vacant,
    Restore {
        installed: Option<Document>,
        previous: Option<Prior>,
        demoted: Vec<DocumentKey>,
    },
}

/// Reversal of one mutation of one key.
#[derive(Debug, Clone)]
pub struct Command {
    key: DocumentKey,
    reversal: Reversal,
}

impl Command {
    /// A mutation that changed nothing, e.g. deleting an absent key.
    /// Undoing it only consumes the entry.
    pub fn vacant(key: DocumentKey) -> Self {
        Self { key, reversal: Reversal::Vacant }
    }

    pub fn restore(
        key: DocumentKey,
        installed: Option<Document>,
        previous: Option<Prior>,
        demoted: Vec<DocumentKey>,
    ) -> Self {
        Self { key, reversal: Reversal::Restore { installed, previous, demoted } }
    }

    pub fn key(&self) -> &DocumentKey {
        &self.key
    }

    /// Reverse the mutation: drop what it installed, bring back what it
    /// demoted, then restore what it displaced.
    pub fn undo<T: UndoTarget + ?Sized>(self, target: &mut T) -> DocResult<()> {
        let Reversal::Restore { installed, previous, demoted } = self.reversal else {
            return Ok(());
        };
        if let Some(doc) = &installed {
            target.uninstall(doc)?;
        }
        for key in demoted.iter().rev() {
            target.repromote(key)?;
        }
        if let Some(prior) = previous {
            target.reinstall(prior)?;
        }
        Ok(())
    }
}

/// Commands produced by one bulk mutation, undoable together or one key at a time.
#[derive(Debug, Clone, Default)]
pub struct CompoundCommand {
    commands: Vec<Command>,
}

impl CompoundCommand {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn contains_key(&self, key: &DocumentKey) -> bool {
        self.keys().any(|candidate| candidate == key)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &DocumentKey> {
        self.commands.iter().map(Command::key)
    }

    /// Undo every command, newest first. All commands are attempted;
    /// the first failure is returned.
    pub fn undo<T: UndoTarget + ?Sized>(self, target: &mut T) -> DocResult<()> {
        let mut outcome = Ok(());
        for command in self.commands.into_iter().rev() {
            if let Err(e) = command.undo(target) {
                if outcome.is_ok() {
                    outcome = Err(e);
                }
            }
        }
        outcome
    }

    /// Undo and drop only the command for `key`. Returns false if there was none.
    pub fn undo_key<T: UndoTarget + ?Sized>(&mut self, key: &DocumentKey, target: &mut T) -> DocResult<bool> {
        let Some(position) = self.commands.iter().position(|command| command.key() == key) else {
            return Ok(false);
        };
        self.commands.remove(position).undo(target)?;
        Ok(true)
    }
}

/// One entry on the store's undo log.
#[derive(Debug, Clone)]
pub enum UndoEntry {
    Single(Command),
    Compound(CompoundCommand),
}

impl UndoEntry {
    /// True if undoing this entry would affect `key`.
    pub fn targets(&self, key: &DocumentKey) -> bool {
        match self {
            UndoEntry::Single(command) => command.key() == key,
            UndoEntry::Compound(compound) => compound.contains_key(key),
        }
    }

    pub fn undo<T: UndoTarget + ?Sized>(self, target: &mut T) -> DocResult<()> {
        match self {
            UndoEntry::Single(command) => command.undo(target),
            UndoEntry::Compound(compound) => compound.undo(target),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DocStoreError;

    #[derive(Debug, PartialEq, Eq)]
    enum Call {
        Uninstall(String),
        Repromote(String),
        Reinstall(String, bool),
    }

    #[derive(Default)]
    struct Recorder {
        calls: Vec<Call>,
        fail_on_repromote: bool,
    }

    impl UndoTarget for Recorder {
        fn uninstall(&mut self, doc: &Document) -> DocResult<()> {
            self.calls.push(Call::Uninstall(doc.key().to_string()));
            Ok(())
        }

        fn repromote(&mut self, key: &DocumentKey) -> DocResult<()> {
            self.calls.push(Call::Repromote(key.to_string()));
            if self.fail_on_repromote {
                return Err(DocStoreError::invalid("disk unavailable"));
            }
            Ok(())
        }

        fn reinstall(&mut self, prior: Prior) -> DocResult<()> {
            self.calls.push(Call::Reinstall(prior.document.key().to_string(), prior.resident));
            Ok(())
        }
    }

    fn key(raw: &str) -> DocumentKey {
        DocumentKey::new(raw).unwrap()
    }

    fn doc(raw: &str, text: &str) -> Document {
        Document::text(key(raw), text).unwrap()
    }

    #[test]
    fn test_stack_remove_latest_keeps_order() {
        let mut stack = UndoStack::new();
        for value in [1, 2, 3, 2, 5] {
            stack.push(value);
        }
        assert_eq!(stack.remove_latest(|v| *v == 2), Some(2));
        assert_eq!(stack.remove_latest(|v| *v == 9), None);
        assert_eq!(stack.len(), 4);
        assert_eq!(stack.peek(), Some(&5));

        let mut drained = Vec::new();
        while let Some(value) = stack.pop() {
            drained.push(value);
        }
        assert_eq!(drained, vec![5, 3, 2, 1]);
        assert!(stack.is_empty());
    }

    #[test]
    fn test_restore_undo_order() {
        let command = Command::restore(
            key("a"),
            Some(doc("a", "new")),
            Some(Prior { document: doc("a", "old"), resident: false }),
            vec![key("b"), key("c")],
        );
        let mut recorder = Recorder::default();
        command.undo(&mut recorder).unwrap();
        assert_eq!(
            recorder.calls,
            vec![
                Call::Uninstall("a".into()),
                Call::Repromote("c".into()),
                Call::Repromote("b".into()),
                Call::Reinstall("a".into(), false),
            ]
        );
    }

    #[test]
    fn test_vacant_undo_does_nothing() {
        let command = Command::vacant(key("a"));
        let mut recorder = Recorder::default();
        command.undo(&mut recorder).unwrap();
        assert!(recorder.calls.is_empty());
    }

    #[test]
    fn test_compound_undo_key_removes_only_that_command() {
        let mut compound = CompoundCommand::new();
        for raw in ["a", "b", "c"] {
            compound.push(Command::restore(
                key(raw),
                None,
                Some(Prior { document: doc(raw, "text"), resident: true }),
                Vec::new(),
            ));
        }
        let mut recorder = Recorder::default();
        assert!(compound.undo_key(&key("b"), &mut recorder).unwrap());
        assert!(!compound.undo_key(&key("b"), &mut recorder).unwrap());
        assert_eq!(recorder.calls, vec![Call::Reinstall("b".into(), true)]);
        assert_eq!(compound.keys().map(|k| k.as_str()).collect::<Vec<_>>(), vec!["a", "c"]);

        let entry = UndoEntry::Compound(compound);
        assert!(entry.targets(&key("a")));
        assert!(!entry.targets(&key("b")));

        entry.undo(&mut recorder).unwrap();
        assert_eq!(recorder.calls[1..], [Call::Reinstall("c".into(), true), Call::Reinstall("a".into(), true)]);
    }

    #[test]
    fn test_compound_undo_attempts_every_command() {
        let mut compound = CompoundCommand::new();
        compound.push(Command::restore(key("a"), None, None, vec![key("x")]));
        compound.push(Command::restore(key("b"), None, None, vec![key("y")]));
        let mut recorder = Recorder { fail_on_repromote: true, ..Recorder::default() };
        assert!(compound.undo(&mut recorder).is_err());
        assert_eq!(recorder.calls, vec![Call::Repromote("y".into()), Call::Repromote("x".into())]);
    }
}
