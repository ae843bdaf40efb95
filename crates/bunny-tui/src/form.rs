//! Input form for adding a cluster definition.

use bunny_cluster::ConnectionParameters;
use crossterm::event::{KeyCode, KeyEvent};

/// Default management endpoint offered for new clusters.
const DEFAULT_URI: &str = "http://localhost:15672";
/// Default broker credentials.
const DEFAULT_CREDENTIAL: &str = "guest";

/// Form fields in tab order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// Cluster name, also the definition file name.
    Name,
    /// Management API base URI.
    Uri,
    /// Broker user.
    Username,
    /// Broker password.
    Password,
}

impl Field {
    /// Every field in display order.
    pub const ALL: [Field; 4] = [Self::Name, Self::Uri, Self::Username, Self::Password];

    /// Label shown next to the input.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Name => "Name",
            Self::Uri => "URI",
            Self::Username => "Username",
            Self::Password => "Password",
        }
    }

    fn index(self) -> usize {
        match self {
            Self::Name => 0,
            Self::Uri => 1,
            Self::Username => 2,
            Self::Password => 3,
        }
    }
}

/// What the caller should do after a key press.
#[derive(Debug, PartialEq, Eq)]
pub enum FormAction {
    /// Keep the form open.
    Edit,
    /// Close the form without saving.
    Cancel,
    /// Create a cluster from these values.
    Submit {
        /// Trimmed cluster name.
        name: String,
        /// Direct connection to create it with.
        params: ConnectionParameters,
    },
}

/// State of the add-cluster popup.
#[derive(Debug, Clone)]
pub struct ClusterForm {
    values: [String; 4],
    /// Field receiving input.
    pub focus: Field,
    /// Last submit error, shown under the inputs.
    pub error: Option<String>,
}

impl Default for ClusterForm {
    fn default() -> Self {
        Self {
            values: [
                String::new(),
                DEFAULT_URI.to_string(),
                DEFAULT_CREDENTIAL.to_string(),
                DEFAULT_CREDENTIAL.to_string(),
            ],
            focus: Field::Name,
            error: None,
        }
    }
}

impl ClusterForm {
    /// Empty name, local broker defaults elsewhere.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw value of `field`.
    #[must_use]
    pub fn value(&self, field: Field) -> &str {
        &self.values[field.index()]
    }

    /// Value as rendered. The password is masked.
    #[must_use]
    pub fn display_value(&self, field: Field) -> String {
        let value = self.value(field);
        match field {
            Field::Password => "*".repeat(value.chars().count()),
            _ => value.to_string(),
        }
    }

    /// Apply a key press.
    pub fn handle_key(&mut self, key: KeyEvent) -> FormAction {
        match key.code {
            KeyCode::Esc => return FormAction::Cancel,
            KeyCode::Enter => return self.submit(),
            KeyCode::Tab | KeyCode::Down => self.move_focus(1),
            KeyCode::BackTab | KeyCode::Up => self.move_focus(Field::ALL.len() - 1),
            KeyCode::Backspace => {
                self.values[self.focus.index()].pop();
            }
            KeyCode::Char(c) => self.values[self.focus.index()].push(c),
            _ => {}
        }
        FormAction::Edit
    }

    fn move_focus(&mut self, step: usize) {
        self.focus = Field::ALL[(self.focus.index() + step) % Field::ALL.len()];
    }

    fn submit(&self) -> FormAction {
        FormAction::Submit {
            name: self.value(Field::Name).trim().to_string(),
            params: ConnectionParameters::direct(
                self.value(Field::Uri).trim(),
                self.value(Field::Username),
                self.value(Field::Password),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::KeyModifiers;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn type_text(form: &mut ClusterForm, text: &str) {
        for c in text.chars() {
            form.handle_key(key(KeyCode::Char(c)));
        }
    }

    #[test]
    fn test_focus_cycles_both_ways() {
        let mut form = ClusterForm::new();
        form.handle_key(key(KeyCode::Up));
        assert_eq!(form.focus, Field::Password);
        form.handle_key(key(KeyCode::Tab));
        assert_eq!(form.focus, Field::Name);
        form.handle_key(key(KeyCode::Down));
        assert_eq!(form.focus, Field::Uri);
    }

    #[test]
    fn test_editing_and_masking() {
        let mut form = ClusterForm::new();
        type_text(&mut form, "prodx");
        form.handle_key(key(KeyCode::Backspace));
        form.handle_key(key(KeyCode::BackTab));
        form.handle_key(key(KeyCode::Backspace));
        type_text(&mut form, "t");

        assert_eq!(form.value(Field::Name), "prod");
        assert_eq!(form.value(Field::Password), "guest");
        assert_eq!(form.display_value(Field::Password), "*****");
        assert_eq!(form.display_value(Field::Uri), "http://localhost:15672");
    }

    #[test]
    fn test_submit_trims_name() {
        let mut form = ClusterForm::new();
        type_text(&mut form, "  prod ");

        match form.handle_key(key(KeyCode::Enter)) {
            FormAction::Submit { name, params } => {
                assert_eq!(name, "prod");
                assert_eq!(params.username, "guest");
                assert!(params.validate().is_ok());
            }
            other => panic!("unexpected action: {other:?}"),
        }
        assert_eq!(form.handle_key(key(KeyCode::Esc)), FormAction::Cancel);
    }
}
