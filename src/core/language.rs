use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use itertools::Itertools;

use crate::config::Toolchains;
use crate::constants::INPUT_FILE_NAME;
use crate::core::domain::Language;
use crate::core::traits::language::{LanguageAdapter, LaunchPlan, SourceFile};

const DEFAULT_JAVA_CLASS: &str = "Main";

// Runs before main so a timeout kill doesn't swallow buffered stdout.
const UNBUFFERED_STDOUT_HOOK: &str = r#"#include <stdio.h>
#ifdef __cplusplus
extern "C" {
#endif
void __attribute__((constructor)) __coderunner_unbuffer_stdout(void) {
    setbuf(stdout, NULL);
}
#ifdef __cplusplus
}
#endif
"#;

#[derive(Debug, Default)]
pub struct LanguageRegistry {
    adapters: HashMap<Language, Arc<dyn LanguageAdapter>>,
}

impl LanguageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_toolchains(toolchains: &Toolchains, enabled: &[Language]) -> Self {
        enabled
            .iter()
            .unique()
            .fold(Self::new(), |registry, language| {
                let adapter: Arc<dyn LanguageAdapter> = match language {
                    Language::C => Arc::new(GnuAdapter::c(&toolchains.gcc)),
                    Language::Cpp => Arc::new(GnuAdapter::cpp(&toolchains.gxx)),
                    Language::Java => {
                        Arc::new(JavaAdapter::new(&toolchains.javac, &toolchains.java))
                    }
                };
                registry.with_adapter(adapter)
            })
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn LanguageAdapter>) -> Self {
        self.adapters.insert(adapter.language(), adapter);
        self
    }

    pub fn get(&self, language: &Language) -> Option<Arc<dyn LanguageAdapter>> {
        self.adapters.get(language).cloned()
    }

    pub fn supports(&self, language: &Language) -> bool {
        self.adapters.contains_key(language)
    }

    pub fn languages(&self) -> Vec<Language> {
        self.adapters
            .keys()
            .copied()
            .sorted_by_key(|l| l.as_str())
            .collect()
    }
}

/// gcc / g++ compile-then-run.
#[derive(Debug, Clone)]
pub struct GnuAdapter {
    language: Language,
    compiler: String,
    source_name: &'static str,
    flags: &'static [&'static str],
}

impl GnuAdapter {
    pub fn c(gcc: &Path) -> Self {
        Self {
            language: Language::C,
            compiler: shell_quote(&gcc.to_string_lossy()),
            source_name: "main.c",
            flags: &["-O2", "-lm"],
        }
    }

    pub fn cpp(gxx: &Path) -> Self {
        Self {
            language: Language::Cpp,
            compiler: shell_quote(&gxx.to_string_lossy()),
            source_name: "main.cpp",
            flags: &["-std=c++17", "-O2"],
        }
    }
}

impl LanguageAdapter for GnuAdapter {
    fn language(&self) -> Language {
        self.language
    }

    fn plan(&self, code: &str) -> LaunchPlan {
        let contents = format!(
            "{}#line 1 \"{}\"\n{}",
            UNBUFFERED_STDOUT_HOOK, self.source_name, code
        );
        let build = std::iter::once(self.compiler.as_str())
            .chain([self.source_name, "-o", "main"])
            .chain(self.flags.iter().copied())
            .join(" ");

        LaunchPlan {
            files: vec![SourceFile {
                name: self.source_name.to_string(),
                contents,
            }],
            build: Some(build),
            run: format!("./main < {}", INPUT_FILE_NAME),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JavaAdapter {
    javac: String,
    java: String,
}

impl JavaAdapter {
    pub fn new(javac: &Path, java: &Path) -> Self {
        Self {
            javac: shell_quote(&javac.to_string_lossy()),
            java: shell_quote(&java.to_string_lossy()),
        }
    }
}

impl LanguageAdapter for JavaAdapter {
    fn language(&self) -> Language {
        Language::Java
    }

    fn plan(&self, code: &str) -> LaunchPlan {
        let class_name = public_class_name(code).unwrap_or(DEFAULT_JAVA_CLASS);
        let source_name = format!("{}.java", class_name);

        LaunchPlan {
            build: Some(format!("{} {}", self.javac, source_name)),
            run: format!(
                "{} -cp . {} < {}",
                self.java, class_name, INPUT_FILE_NAME
            ),
            files: vec![SourceFile {
                name: source_name,
                contents: code.to_string(),
            }],
        }
    }
}

/// Finds the first `public class <Name>` declaration. A heuristic over
/// whitespace-separated tokens: the name is the leading run of ASCII word
/// characters after `class`, so it is always safe to put in a command line.
pub fn public_class_name(code: &str) -> Option<&str> {
    code.split_whitespace()
        .tuple_windows()
        .filter(|(public, class, _)| public.ends_with("public") && *class == "class")
        .map(|(_, _, name)| {
            let end = name
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(name.len());
            &name[..end]
        })
        .find(|name| !name.is_empty())
}

fn shell_quote(raw: &str) -> String {
    let safe = !raw.is_empty()
        && raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | '+'));
    if safe {
        raw.to_string()
    } else {
        format!("'{}'", raw.replace('\'', r"'\''"))
    }
}
