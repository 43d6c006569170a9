use std::sync::Arc;

use anyhow::{Context, Result};
use pql::backend::InMemoryBackend;
use pql::{CompilerConfig, EntityType, PqlEngine, PqlError, Registry};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing_subscriber::{fmt, EnvFilter};

/// 当前目录下可选的注册表与编译器配置
const REGISTRY_FILE: &str = "registry.json";
const CONFIG_FILE: &str = "pql.json";

const HELP: &str = r#"命令:
  <pql>              编译查询并打印请求 JSON
  :exec <pql>        在已加载的文档上执行查询
  :ast <pql>         打印改写后的 AST
  :type <实体类型>   切换实体类型 (当前类型显示在提示符中)
  :types             列出所有实体类型
  :load <文件>       加载测试文档 (JSON)
  :help              显示帮助
  :quit              退出"#;

/// 优先使用当前目录的JSON注册表，失败时使用内置注册表
fn load_registry() -> Result<Registry> {
    match Registry::from_json_file(REGISTRY_FILE) {
        Ok(registry) => {
            println!("✅ 成功从 {} 加载注册表", REGISTRY_FILE);
            Ok(registry)
        }
        Err(e) => {
            println!("⚠️ 无法加载注册表 ({}), 使用内置注册表", e);
            Registry::builtin().context("内置注册表无效")
        }
    }
}

fn load_config() -> CompilerConfig {
    match CompilerConfig::from_json_file(CONFIG_FILE) {
        Ok(config) => {
            println!("✅ 成功从 {} 加载编译器配置", CONFIG_FILE);
            config
        }
        Err(e) => {
            println!("⚠️ 无法加载编译器配置 ({}), 使用默认配置", e);
            CompilerConfig::default()
        }
    }
}

struct Session {
    engine: PqlEngine,
    entity_type: EntityType,
    backend: InMemoryBackend,
}

impl Session {
    fn prompt(&self) -> String {
        format!("pql[{}]> ", self.entity_type)
    }

    /// 处理一行输入，返回 false 表示退出
    fn handle(&mut self, line: &str) -> Result<bool> {
        let (command, rest) = match line.split_once(char::is_whitespace) {
            Some((command, rest)) => (command, rest.trim()),
            None => (line, ""),
        };

        match command {
            ":quit" | ":q" => return Ok(false),
            ":help" => println!("{}", HELP),
            ":types" => {
                for entity_type in self.engine.registry().entity_types() {
                    let marker = if entity_type == self.entity_type { "*" } else { " " };
                    println!(" {} {}", marker, entity_type);
                }
            }
            ":type" => match rest.parse::<EntityType>() {
                Ok(entity_type) => {
                    self.entity_type = entity_type;
                    println!("✓ 当前实体类型: {}", entity_type);
                }
                Err(e) => println!("✗ {}", e),
            },
            ":load" => match InMemoryBackend::from_json_file(rest) {
                Ok(backend) => {
                    self.backend = backend;
                    println!("✓ 已加载 {}", rest);
                }
                Err(e) => println!("✗ {}", e),
            },
            ":ast" => match self.engine.prepare(self.entity_type, rest) {
                Ok(ast) => println!("{:#?}", ast),
                Err(e) => report(&e),
            },
            ":exec" => match self.engine.execute(&self.backend, self.entity_type, rest) {
                Ok(response) => {
                    println!("共 {} 条结果", response.total);
                    for hit in &response.hits {
                        println!("  {} ({}) {}", hit.id, hit.score, serde_json::to_string(&hit.fields)?);
                    }
                    for (name, facet) in response.facets() {
                        println!("[分面 {}] 缺失: {}", name, facet.missing);
                        for bucket in &facet.buckets {
                            println!("  {} = {}", bucket.key, bucket.doc_count);
                        }
                    }
                }
                Err(e) => report(&e),
            },
            _ => match self.engine.compile(self.entity_type, line) {
                Ok(request) => {
                    println!("[{}/{}]", request.index, request.doc_type);
                    println!("{}", serde_json::to_string_pretty(&request.to_json())?);
                }
                Err(e) => report(&e),
            },
        }
        Ok(true)
    }
}

fn report(error: &PqlError) {
    println!("✗ {} ({:?})", error, error.class());
}

fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .init();

    println!("--- PQL: 门户查询语言编译器 ---");
    println!("\n[配置信息]:");
    let registry = Arc::new(load_registry()?);
    let config = load_config();
    println!(
        "索引 {}，{} 个实体类型，默认页大小 {}，最大页大小 {}",
        registry.index(),
        registry.entity_types().len(),
        config.default_size,
        config.max_size
    );
    println!("\n{}", HELP);

    let mut session = Session {
        engine: PqlEngine::new(registry, config),
        entity_type: EntityType::DonorCentric,
        backend: InMemoryBackend::new(),
    };

    let mut editor = DefaultEditor::new()?;
    loop {
        match editor.readline(&session.prompt()) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                editor.add_history_entry(line)?;
                if !session.handle(line)? {
                    break;
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        }
    }

    Ok(())
}
