use llmgate_provider_core::{DispatchRule, DispatchTable, Op, Proto, TransformContext};

/// How a generate-content call's stream shape relates to what the binding's
/// dialect natively speaks (§4.D/§4.J): same shape, or one of the two
/// fallback directions the transform layer's stream machinery covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerateMode {
    Same,
    StreamToNon,
    NonToStream,
}

#[derive(Debug, Clone, Copy)]
pub struct ResolvedCall {
    pub provider_proto: Proto,
    pub provider_op: Op,
    pub mode: GenerateMode,
}

/// Builds the `DispatchTable` for a binding whose provider natively speaks
/// `native` (the binding's own dialect, e.g. an `openai` provider natively
/// speaks `OpenAIChat`). Since the transform layer covers every dialect pair
/// for both generate and non-generate ops (§4.I), any inbound dialect can be
/// satisfied either natively (when it already matches) or via a transform to
/// `native` — there is no op this binding type cannot serve.
pub fn dispatch_table_for(native: Proto) -> DispatchTable {
    use llmgate_provider_core::OperationKind;

    let mut ops = [DispatchRule::Unsupported; OperationKind::COUNT];
    for kind in ALL_OPERATION_KINDS {
        let Some(op_proto) = operation_kind_proto(*kind) else {
            continue;
        };
        ops[*kind as usize] = if op_proto == native {
            DispatchRule::Native
        } else {
            DispatchRule::Transform { target: native }
        };
    }
    DispatchTable::new(ops)
}

const ALL_OPERATION_KINDS: &[llmgate_provider_core::OperationKind] = {
    use llmgate_provider_core::OperationKind::*;
    &[
        ClaudeGenerate,
        ClaudeGenerateStream,
        ClaudeCountTokens,
        ClaudeModelsList,
        ClaudeModelsGet,
        GeminiGenerate,
        GeminiGenerateStream,
        GeminiCountTokens,
        GeminiModelsList,
        GeminiModelsGet,
        OpenAIChatGenerate,
        OpenAIChatGenerateStream,
        OpenAIResponseGenerate,
        OpenAIResponseGenerateStream,
        OpenAIInputTokens,
        OpenAIModelsList,
        OpenAIModelsGet,
    ]
};

fn operation_kind_proto(kind: llmgate_provider_core::OperationKind) -> Option<Proto> {
    use llmgate_provider_core::OperationKind::*;
    Some(match kind {
        ClaudeGenerate | ClaudeGenerateStream | ClaudeCountTokens | ClaudeModelsList
        | ClaudeModelsGet => Proto::Claude,
        GeminiGenerate | GeminiGenerateStream | GeminiCountTokens | GeminiModelsList
        | GeminiModelsGet => Proto::Gemini,
        OpenAIChatGenerate | OpenAIChatGenerateStream => Proto::OpenAIChat,
        OpenAIResponseGenerate | OpenAIResponseGenerateStream => Proto::OpenAIResponse,
        OpenAIInputTokens | OpenAIModelsList | OpenAIModelsGet => Proto::OpenAI,
        _ => return None,
    })
}

fn rule_to_proto(user_proto: Proto, rule: DispatchRule) -> Option<Proto> {
    match rule {
        DispatchRule::Native => Some(user_proto),
        DispatchRule::Transform { target } => Some(target),
        DispatchRule::Unsupported => None,
    }
}

/// Resolves which provider-side dialect/op/stream-shape a binding must be
/// called with to satisfy a `user_proto`/`user_op` request, consulting the
/// binding's `DispatchTable`. Returns `None` when the binding's dialect has
/// no route (native, transformed, or stream-fallback) for this op.
pub fn resolve_call_shape(
    dispatch: &DispatchTable,
    user_proto: Proto,
    user_op: Op,
) -> Option<ResolvedCall> {
    let is_generate = matches!(user_op, Op::GenerateContent | Op::StreamGenerateContent);
    if !is_generate {
        let ctx = TransformContext {
            src: user_proto,
            dst: user_proto,
            src_op: user_op,
            dst_op: user_op,
        };
        let rule = dispatch.rule_for_context(&ctx);
        let provider_proto = rule_to_proto(user_proto, rule)?;
        return Some(ResolvedCall {
            provider_proto,
            provider_op: user_op,
            mode: GenerateMode::Same,
        });
    }

    let same_ctx = TransformContext {
        src: user_proto,
        dst: user_proto,
        src_op: user_op,
        dst_op: user_op,
    };
    let same_rule = dispatch.rule_for_context(&same_ctx);
    if let Some(provider_proto) = rule_to_proto(user_proto, same_rule) {
        return Some(ResolvedCall {
            provider_proto,
            provider_op: user_op,
            mode: GenerateMode::Same,
        });
    }

    let want_stream = user_op == Op::StreamGenerateContent;
    if want_stream {
        let non_ctx = TransformContext {
            src: user_proto,
            dst: user_proto,
            src_op: Op::GenerateContent,
            dst_op: Op::GenerateContent,
        };
        let rule = dispatch.rule_for_context(&non_ctx);
        let provider_proto = rule_to_proto(user_proto, rule)?;
        return Some(ResolvedCall {
            provider_proto,
            provider_op: Op::GenerateContent,
            mode: GenerateMode::NonToStream,
        });
    }

    let stream_ctx = TransformContext {
        src: user_proto,
        dst: user_proto,
        src_op: Op::StreamGenerateContent,
        dst_op: Op::StreamGenerateContent,
    };
    let rule = dispatch.rule_for_context(&stream_ctx);
    let provider_proto = rule_to_proto(user_proto, rule)?;
    Some(ResolvedCall {
        provider_proto,
        provider_op: Op::StreamGenerateContent,
        mode: GenerateMode::StreamToNon,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with(rule: DispatchRule, kind: llmgate_provider_core::OperationKind) -> DispatchTable {
        let mut ops = [DispatchRule::Unsupported; llmgate_provider_core::OperationKind::COUNT];
        ops[kind as usize] = rule;
        DispatchTable::new(ops)
    }

    #[test]
    fn same_shape_preferred_when_native() {
        let table = table_with(
            DispatchRule::Native,
            llmgate_provider_core::OperationKind::OpenAIChatGenerate,
        );
        let resolved =
            resolve_call_shape(&table, Proto::OpenAIChat, Op::GenerateContent).unwrap();
        assert_eq!(resolved.mode, GenerateMode::Same);
        assert_eq!(resolved.provider_proto, Proto::OpenAIChat);
    }

    #[test]
    fn falls_back_to_non_stream_when_stream_unsupported() {
        let table = table_with(
            DispatchRule::Native,
            llmgate_provider_core::OperationKind::OpenAIChatGenerate,
        );
        let resolved =
            resolve_call_shape(&table, Proto::OpenAIChat, Op::StreamGenerateContent).unwrap();
        assert_eq!(resolved.mode, GenerateMode::NonToStream);
        assert_eq!(resolved.provider_op, Op::GenerateContent);
    }

    #[test]
    fn no_route_returns_none() {
        let table = DispatchTable::default();
        assert!(resolve_call_shape(&table, Proto::OpenAIChat, Op::GenerateContent).is_none());
    }

    #[test]
    fn dispatch_table_for_native_is_native_others_transform() {
        let table = dispatch_table_for(Proto::Gemini);
        let claude = resolve_call_shape(&table, Proto::Claude, Op::GenerateContent).unwrap();
        assert_eq!(claude.mode, GenerateMode::Same);
        assert_eq!(claude.provider_proto, Proto::Gemini);

        let gemini = resolve_call_shape(&table, Proto::Gemini, Op::StreamGenerateContent).unwrap();
        assert_eq!(gemini.mode, GenerateMode::Same);
        assert_eq!(gemini.provider_proto, Proto::Gemini);
    }
}
