use crate::database::preset::PresetDetail;
use crate::schema::enum_def::{MessageRole, PresetItemType};
use crate::service::transform::ChatMessage;
use crate::service::vars::VarScope;

/// Walks a preset's items in sort order and produces the final message list
/// sent upstream. `normal` items contribute their (variable-expanded)
/// content, `user_input` stands for the last inbound user message, and
/// `history` splices in the rest of the inbound conversation. A preset
/// without a `user_input` item still gets the last user message appended.
///
/// Without a preset, or with a preset that has no enabled items, the inbound
/// list passes through unchanged.
pub fn expand_preset(
    detail: Option<&PresetDetail>,
    inbound: &[ChatMessage],
    scope: &mut VarScope,
) -> Vec<ChatMessage> {
    let detail = match detail {
        Some(detail) => detail,
        None => return inbound.to_vec(),
    };

    let enabled_items: Vec<_> = detail.items.iter().filter(|item| item.is_enabled).collect();
    if enabled_items.is_empty() {
        return inbound.to_vec();
    }

    let last_user_index = inbound
        .iter()
        .rposition(|message| message.role == MessageRole::User);

    let mut output = Vec::new();
    let mut saw_user_input_item = false;

    for item in enabled_items {
        match item.item_type {
            PresetItemType::Normal => {
                output.push(ChatMessage::new(item.role, scope.expand(&item.content)));
            }
            PresetItemType::UserInput => {
                saw_user_input_item = true;
                if let Some(index) = last_user_index {
                    output.push(inbound[index].clone());
                }
            }
            PresetItemType::History => {
                for (index, message) in inbound.iter().enumerate() {
                    if Some(index) != last_user_index {
                        output.push(message.clone());
                    }
                }
            }
        }
    }

    if !saw_user_input_item {
        if let Some(index) = last_user_index {
            output.push(inbound[index].clone());
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::preset::{Preset, PresetItem};

    fn make_detail(items: Vec<PresetItem>) -> PresetDetail {
        PresetDetail {
            preset: Preset {
                id: 1,
                name: "test".to_string(),
                account_id: 1,
                is_enabled: true,
                sort_order: 0,
                deleted_at: None,
                created_at: 0,
                updated_at: 0,
            },
            items,
        }
    }

    fn item(id: i64, role: MessageRole, item_type: PresetItemType, content: &str) -> PresetItem {
        PresetItem {
            id,
            preset_id: 1,
            role,
            item_type,
            content: content.to_string(),
            is_enabled: true,
            sort_order: id as i32,
            created_at: 0,
        }
    }

    fn user(content: &str) -> ChatMessage {
        ChatMessage::new(MessageRole::User, content)
    }

    fn assistant(content: &str) -> ChatMessage {
        ChatMessage::new(MessageRole::Assistant, content)
    }

    #[test]
    fn test_no_preset_is_identity() {
        let inbound = vec![user("a"), assistant("b"), user("c")];
        let mut scope = VarScope::new(0);
        assert_eq!(expand_preset(None, &inbound, &mut scope), inbound);
    }

    #[test]
    fn test_empty_preset_is_identity() {
        let inbound = vec![user("a"), user("b")];
        let detail = make_detail(vec![]);
        let mut scope = VarScope::new(0);
        assert_eq!(expand_preset(Some(&detail), &inbound, &mut scope), inbound);
    }

    #[test]
    fn test_normal_and_user_input() {
        let detail = make_detail(vec![
            item(1, MessageRole::System, PresetItemType::Normal, "You are concise."),
            item(2, MessageRole::User, PresetItemType::UserInput, ""),
        ]);
        let inbound = vec![user("Hi")];
        let mut scope = VarScope::new(0);
        let result = expand_preset(Some(&detail), &inbound, &mut scope);

        assert_eq!(result.len(), 2);
        assert_eq!(result[0], ChatMessage::new(MessageRole::System, "You are concise."));
        assert_eq!(result[1], user("Hi"));
    }

    #[test]
    fn test_user_input_takes_last_user_message() {
        let detail = make_detail(vec![item(1, MessageRole::User, PresetItemType::UserInput, "ignored")]);
        let inbound = vec![user("first"), assistant("reply"), user("second")];
        let mut scope = VarScope::new(0);
        let result = expand_preset(Some(&detail), &inbound, &mut scope);

        assert_eq!(result, vec![user("second")]);
    }

    #[test]
    fn test_history_excludes_last_user_message() {
        let detail = make_detail(vec![
            item(1, MessageRole::User, PresetItemType::History, ""),
            item(2, MessageRole::User, PresetItemType::UserInput, ""),
        ]);
        let inbound = vec![user("q1"), assistant("a1"), user("q2")];
        let mut scope = VarScope::new(0);
        let result = expand_preset(Some(&detail), &inbound, &mut scope);

        assert_eq!(result, vec![user("q1"), assistant("a1"), user("q2")]);
    }

    #[test]
    fn test_history_only_preset_still_appends_user_message() {
        let detail = make_detail(vec![item(1, MessageRole::User, PresetItemType::History, "")]);
        let inbound = vec![user("q1"), assistant("a1"), user("q2")];
        let mut scope = VarScope::new(0);
        let result = expand_preset(Some(&detail), &inbound, &mut scope);

        assert_eq!(result, vec![user("q1"), assistant("a1"), user("q2")]);
    }

    #[test]
    fn test_disabled_items_are_skipped() {
        let mut disabled = item(1, MessageRole::System, PresetItemType::Normal, "hidden");
        disabled.is_enabled = false;
        let detail = make_detail(vec![
            disabled,
            item(2, MessageRole::User, PresetItemType::UserInput, ""),
        ]);
        let inbound = vec![user("Hi")];
        let mut scope = VarScope::new(0);
        let result = expand_preset(Some(&detail), &inbound, &mut scope);

        assert_eq!(result, vec![user("Hi")]);
    }

    #[test]
    fn test_normal_items_are_variable_expanded() {
        let detail = make_detail(vec![
            item(1, MessageRole::System, PresetItemType::Normal, "d1 rolls {{roll 1d1}}"),
            item(2, MessageRole::User, PresetItemType::UserInput, ""),
        ]);
        let inbound = vec![user("Hi")];
        let mut scope = VarScope::new(0);
        let result = expand_preset(Some(&detail), &inbound, &mut scope);

        assert_eq!(result[0].content, "d1 rolls 1");
    }

    #[test]
    fn test_variable_scope_spans_items() {
        let detail = make_detail(vec![
            item(1, MessageRole::System, PresetItemType::Normal, "{{setvar::who::Ada}}"),
            item(2, MessageRole::System, PresetItemType::Normal, "Talk to {{getvar::who}}"),
            item(3, MessageRole::User, PresetItemType::UserInput, ""),
        ]);
        let inbound = vec![user("Hi")];
        let mut scope = VarScope::new(0);
        let result = expand_preset(Some(&detail), &inbound, &mut scope);

        assert_eq!(result[0].content, "");
        assert_eq!(result[1].content, "Talk to Ada");
    }

    #[test]
    fn test_adjacent_same_role_messages_not_merged() {
        let detail = make_detail(vec![
            item(1, MessageRole::User, PresetItemType::Normal, "one"),
            item(2, MessageRole::User, PresetItemType::Normal, "two"),
            item(3, MessageRole::User, PresetItemType::UserInput, ""),
        ]);
        let inbound = vec![user("Hi")];
        let mut scope = VarScope::new(0);
        let result = expand_preset(Some(&detail), &inbound, &mut scope);

        assert_eq!(result, vec![user("one"), user("two"), user("Hi")]);
    }
}
