//! Prompt assembly for every generation mode.

use glupe_core::markers::{BLOCK_END, BLOCK_START};
use glupe_verifier::LangProfile;

/// Everything a whole-file prompt needs.
#[derive(Debug, Clone, Copy)]
pub struct PromptInputs<'a> {
    pub lang: &'a LangProfile,
    /// Resolved blueprint text, containers wrapped in boundary markers
    pub context: &'a str,
    pub instructions: Option<&'a str>,
    /// Existing output source in update mode
    pub old_code: Option<&'a str>,
    /// Rendered error history; empty on the first pass
    pub error_history: &'a str,
    /// Target language was chosen explicitly
    pub explicit_lang: bool,
}

fn marker_rule() -> String {
    format!(
        "IMPORTANT: If you see '{}id', IMPLEMENT the logic between it and '{}id'. PRESERVE these markers exactly in the output so they can be cached.",
        BLOCK_START, BLOCK_END
    )
}

/// Builds oracle prompts.
pub struct PromptBuilder;

impl PromptBuilder {
    /// Single-file generation.
    pub fn build_generation_prompt(inputs: &PromptInputs<'_>) -> String {
        let name = &inputs.lang.name;
        let mut prompt = String::new();
        prompt.push_str("ROLE: Semantic Transpiler.\n");
        prompt.push_str(&format!("TASK: Convert input logic to a single valid {} file.\n", name));
        prompt.push_str("RULES:\n");
        prompt.push_str(&format!(
            "1. NO wrappers (e.g. calling other languages via system()). Re-implement logic natively in {}.\n",
            name
        ));
        prompt.push_str(&format!("2. Use standard libraries/modules native to {}.\n", name));
        prompt.push_str("3. Output must be self-contained and runnable.\n");
        if inputs.lang.produces_binary {
            prompt.push_str("4. Include a 'main' entry point.\n");
        }
        prompt.push_str(&format!("5. {}\n", marker_rule()));
        prompt.push_str("6. No external language headers/imports unless standard.\n");
        Self::append_inputs(&mut prompt, inputs);
        prompt
    }

    /// Multi-file project generation.
    pub fn build_architect_prompt(inputs: &PromptInputs<'_>) -> String {
        let mut prompt = String::from("ROLE: Software Architect.\n");
        if inputs.explicit_lang {
            prompt.push_str(&format!(
                "TASK: Structure and implement the project files for a {} project.\n",
                inputs.lang.name
            ));
        } else {
            prompt.push_str("TASK: Structure and implement the project files based on the provided instructions.\n");
        }
        prompt.push_str("RULES:\n");
        prompt.push_str("1. Use 'EXPORT: \"filename.ext\"' ... 'EXPORT: END' for every file.\n");
        prompt.push_str("2. The language for each file is determined by its extension. You MUST generate valid code for that specific language inside its EXPORT block.\n");
        prompt.push_str("3. Implement the full logic/content. No placeholders.\n");
        prompt.push_str("4. Process '$${ instructions }$$' templates by implementing the logic inside them.\n");
        prompt.push_str(&format!("5. {}\n", marker_rule()));
        prompt.push_str("6. Output ONLY the EXPORT blocks. No conversation or other text.\n");
        Self::append_inputs(&mut prompt, inputs);
        prompt
    }

    /// Narrow prompt for one container in fill mode.
    pub fn build_fill_prompt(id: &str, lang: &LangProfile, file_context: &str, container_prompt: &str) -> String {
        format!(
            "ROLE: Code Generator.\n\
             TASK: Implement the code for the container '{id}'.\n\
             LANGUAGE: {lang}\n\
             CONTEXT:\n{file_context}\n\
             CONTAINER PROMPT:\n{container_prompt}\n\
             OUTPUT: Only the code implementation. No markdown. No explanations.\n",
            lang = lang.name,
        )
    }

    /// One file of a series build.
    pub fn build_series_prompt(filename: &str, project_context: &str, instructions: &str) -> String {
        format!(
            "ROLE: Software Architect.\n\
             TASK: Implement the file '{filename}'.\n\
             CONTEXT:\n{project_context}\n\
             FILE INSTRUCTIONS:\n{instructions}\n\
             RULES:\n\
             1. Implement the full logic. No placeholders.\n\
             2. {rule}\n\
             OUTPUT: Return ONLY the valid code/content for {filename}. No markdown blocks if possible.",
            rule = marker_rule(),
        )
    }

    /// Dead-code removal over generated code.
    pub fn build_tree_shake_prompt(code: &str, lang: &LangProfile) -> String {
        format!(
            "ROLE: Senior Code Optimizer.\n\
             TASK: Analyze the following {name} code and remove UNUSED functions, variables, and imports.\n\
             RULES:\n\
             1. Keep the 'main' function (or entry point) and everything it uses (transitively).\n\
             2. Keep all 'EXPORT:' directives and file structures intact.\n\
             3. Remove dead code that is never called or referenced.\n\
             4. Do not change logic, only remove unused elements.\n\
             5. Return ONLY the cleaned code.\n\
             CODE:\n{code}",
            name = lang.name,
        )
    }

    fn append_inputs(prompt: &mut String, inputs: &PromptInputs<'_>) {
        if let Some(instructions) = inputs.instructions.filter(|s| !s.trim().is_empty()) {
            prompt.push_str(&format!(
                "\n[USER INSTRUCTIONS - HIGHEST PRIORITY]:\n{}\n",
                instructions
            ));
        }

        match inputs.old_code.filter(|s| !s.is_empty()) {
            Some(old) => {
                prompt.push_str("TASK: UPDATE existing code.\n");
                prompt.push_str(&format!("\n--- [OLD CODE] ---\n{}\n--- [END OLD CODE] ---\n", old));
                prompt.push_str(&format!(
                    "\n--- [NEW INPUTS] ---\n{}\n--- [END NEW INPUTS] ---\n",
                    inputs.context
                ));
            }
            None => {
                prompt.push_str(&format!("TASK: Create SINGLE {} file.\n", inputs.lang.name));
                prompt.push_str(&format!(
                    "\n--- INPUT SOURCES ---\n{}\n--- END SOURCES ---\n",
                    inputs.context
                ));
            }
        }

        if !inputs.error_history.is_empty() {
            prompt.push_str(&format!("\n[!] PREVIOUS ERRORS:\n{}\n", inputs.error_history));
        }
        prompt.push_str("\nOUTPUT: Only code.");
    }
}

/// Strip a surrounding markdown fence, if any.
///
/// Keeps everything between the line after the first fence and the last
/// fence; text without a complete fence is returned unchanged.
pub fn extract_code_block(response: &str) -> String {
    let Some(start) = response.find("```") else {
        return response.to_string();
    };
    let Some(line_end) = response[start..].find('\n').map(|i| start + i) else {
        return response.to_string();
    };
    match response.rfind("```") {
        Some(end) if end > line_end => response[line_end + 1..end].to_string(),
        _ => response.to_string(),
    }
}
