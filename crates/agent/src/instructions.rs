//! Agent instructions carrying the parameter binding rules.

use crate::catalogue::Catalogue;

const PREAMBLE: &str = "You are a database retrieval agent. \
Answer the user's questions by calling the available tools and follow these rules strictly.";

const BINDING_RULES: &str = r#"PARAMETER BINDING RULES:
1. Never invent or guess parameter names. Names come only from the parameter table above, under the chosen tool.
2. Extract only parameter VALUES from the user's message.
3. Bind each extracted value to the parameter whose description it matches.

WORKFLOW:
1. Pick the tool that answers the request.
2. Read that tool's entry in the parameter table. Each parameter lists its type, description, default and isRequired flag.
3. Extract values from the user's message and bind them to parameter names.
4. For a parameter the user did not provide:
   - not required and has a default: use the default value;
   - required: do not call the tool, ask the user for the missing value.
5. Call the tool once with the bound arguments and answer from its output.

EXAMPLE:
Parameter table:
{
  "GetCustomer": {
    "customerId": {"type": "integer", "description": "The customer ID", "default": null, "isRequired": true},
    "includeOrders": {"type": "boolean", "description": "Include order history", "default": false, "isRequired": false}
  }
}

User: "Get customer 12345"
- Tool: GetCustomer
- Bind: customerId = 12345
- includeOrders = false (default, not required)

User: "Get customer with orders"
- customerId is required and missing
- Reply: "Please provide the customer ID to retrieve."

Parameter names come from the parameter table only. The user supplies values only."#;

/// Builds the system instructions for an agent bound to `catalogue`.
pub fn build_instructions(catalogue: &Catalogue) -> String {
    format!(
        "{PREAMBLE}\n\nAVAILABLE TOOLS AND THEIR PARAMETERS:\n{}\n\n{BINDING_RULES}",
        catalogue.parameter_table_json()
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use proto::{CallToolResult, RawTool, ToolError};
    use serde_json::{Map, Value, json};
    use tools::ToolProvider;

    use super::*;
    use crate::catalogue::DiscoveryOptions;

    struct NoopProvider;

    #[async_trait]
    impl ToolProvider for NoopProvider {
        async fn list_tools(&self) -> Result<Vec<RawTool>, ToolError> {
            Ok(Vec::new())
        }

        async fn call_tool(
            &self,
            _name: &str,
            _arguments: Map<String, Value>,
        ) -> Result<CallToolResult, ToolError> {
            Ok(CallToolResult::default())
        }
    }

    #[test]
    fn instructions_embed_parameter_table_and_rules() {
        let provider: Arc<dyn ToolProvider> = Arc::new(NoopProvider);
        let catalogue = Catalogue::from_listing(
            vec![RawTool::new(
                "GetRandomNumber",
                "Random number in a range",
                json!({
                    "properties": {
                        "min": {"type": "integer", "default": 8},
                        "max": {"type": "integer", "default": 100}
                    }
                }),
            )],
            &provider,
            DiscoveryOptions::default(),
        )
        .expect("catalogue");

        let text = build_instructions(&catalogue);
        assert!(text.contains(&catalogue.parameter_table_json()));
        assert!(text.contains("\"GetRandomNumber\""));
        assert!(text.contains("Never invent or guess parameter names"));
        assert!(text.contains("ask the user for the missing value"));
    }

    #[test]
    fn empty_catalogue_still_produces_rules() {
        let text = build_instructions(&Catalogue::empty());
        assert!(text.contains("AVAILABLE TOOLS AND THEIR PARAMETERS:\n{}"));
        assert!(text.contains("PARAMETER BINDING RULES"));
    }
}
