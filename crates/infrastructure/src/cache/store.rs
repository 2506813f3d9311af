//! 缓存服务的数据存储
//!
//! 只由反应器任务持有，所有命令串行执行。

use chrono::NaiveDateTime;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

use scheduler_core::time::{format_datetime, now};

use super::protocol::{Payload, Reply, Request};

pub type Responder = oneshot::Sender<Reply>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Keyspace {
    Queue,
    List,
}

/// 弹出的一端：队列按先进先出，`qrpop` 系列取最新推入的一条
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum End {
    Oldest,
    Newest,
}

#[derive(Debug)]
struct Fifo {
    items: VecDeque<String>,
    create_time: NaiveDateTime,
    waiters: VecDeque<Responder>,
}

impl Fifo {
    fn new() -> Self {
        Self {
            items: VecDeque::new(),
            create_time: now(),
            waiters: VecDeque::new(),
        }
    }

    /// 优先交给等待中的阻塞弹出，超时离开的等待者不会吞掉数据
    fn offer(&mut self, value: String) {
        let mut value = value;
        while let Some(waiter) = self.waiters.pop_front() {
            match waiter.send(Reply::text(value)) {
                Ok(()) => return,
                Err(Reply::Value(Payload::Text(returned))) => value = returned,
                Err(_) => return,
            }
        }
        self.items.push_back(value);
    }

    fn take(&mut self, end: End) -> Option<String> {
        match end {
            End::Oldest => self.items.pop_front(),
            End::Newest => self.items.pop_back(),
        }
    }

    fn put_back(&mut self, end: End, value: String) {
        match end {
            End::Oldest => self.items.push_front(value),
            End::Newest => self.items.push_back(value),
        }
    }

    /// 阻塞弹出：有数据直接回复，否则挂起等待
    fn take_or_park(&mut self, end: End, responder: Responder) {
        match self.take(end) {
            Some(value) => {
                if let Err(Reply::Value(Payload::Text(returned))) = responder.send(Reply::text(value)) {
                    self.put_back(end, returned);
                }
            }
            None => self.waiters.push_back(responder),
        }
    }
}

#[derive(Debug)]
struct StringEntry {
    value: String,
    expire_at: Option<Instant>,
}

impl StringEntry {
    fn is_expired(&self, at: Instant) -> bool {
        self.expire_at.is_some_and(|deadline| deadline <= at)
    }
}

/// 命令执行结果
#[derive(Debug)]
pub enum Outcome {
    Reply(Reply),
    /// 阻塞弹出已挂起，等待推入或超时
    Parked,
}

#[derive(Debug, Default)]
pub struct Store {
    queues: HashMap<String, Fifo>,
    lists: HashMap<String, Fifo>,
    strings: HashMap<String, StringEntry>,
    hashes: HashMap<String, HashMap<String, String>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// 执行一条命令；阻塞弹出时 `responder` 会被挂起
    pub fn dispatch(&mut self, request: &Request, responder: Responder, at: Instant) {
        if request.is_blocking() {
            let (keyspace, end) = match request.command.as_str() {
                "qbpop" => (Keyspace::Queue, End::Oldest),
                "qbrpop" => (Keyspace::Queue, End::Newest),
                _ => (Keyspace::List, End::Oldest),
            };
            match request.target() {
                (Some(name), _) => self.fifo_entry(keyspace, name).take_or_park(end, responder),
                (None, _) => {
                    let _ = responder.send(Reply::error("missing param name"));
                }
            }
            return;
        }
        let _ = responder.send(self.execute(request, at));
    }

    /// 执行非阻塞命令
    pub fn execute(&mut self, request: &Request, at: Instant) -> Reply {
        match request.command.as_str() {
            "ping" => Reply::text("PONG"),
            "list" => self.list(at),
            "qpush" => self.push(Keyspace::Queue, request),
            "push" => self.push(Keyspace::List, request),
            "qpop" => self.pop(Keyspace::Queue, End::Oldest, request),
            "qrpop" => self.pop(Keyspace::Queue, End::Newest, request),
            "pop" => self.pop(Keyspace::List, End::Oldest, request),
            "qbpop" | "qbrpop" | "bpop" => Reply::error("blocking command must be dispatched"),
            "llen" => self.llen(request),
            "delete" => self.delete(request),
            "set" => self.set(request, at),
            "get" => self.get(request, at),
            "mset" => self.mset(request, at),
            "hset" => self.hset(request),
            "hget" => self.hget(request),
            "hgetall" => self.hgetall(request),
            "hdel" => self.hdel(request),
            other => Reply::error(format!("invalid command {other}")),
        }
    }

    /// 清理过期的字符串和已经离开的等待者，返回清理的键数
    pub fn sweep(&mut self, at: Instant) -> usize {
        let before = self.strings.len();
        self.strings.retain(|_, entry| !entry.is_expired(at));
        for fifo in self.queues.values_mut().chain(self.lists.values_mut()) {
            fifo.waiters.retain(|waiter| !waiter.is_closed());
        }
        before - self.strings.len()
    }

    fn fifos(&mut self, keyspace: Keyspace) -> &mut HashMap<String, Fifo> {
        match keyspace {
            Keyspace::Queue => &mut self.queues,
            Keyspace::List => &mut self.lists,
        }
    }

    fn fifo_entry(&mut self, keyspace: Keyspace, name: &str) -> &mut Fifo {
        self.fifos(keyspace)
            .entry(name.to_string())
            .or_insert_with(Fifo::new)
    }

    fn list(&self, at: Instant) -> Reply {
        let mut queues: Vec<Value> = self
            .queues
            .iter()
            .map(|(name, fifo)| {
                json!({
                    "name": name,
                    "create_time": format_datetime(&fifo.create_time),
                    "size": fifo.items.len(),
                })
            })
            .collect();
        queues.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));

        let lists: Map<String, Value> = self
            .lists
            .iter()
            .map(|(name, fifo)| (name.clone(), json!(fifo.items.len())))
            .collect();
        let strings: Map<String, Value> = self
            .strings
            .iter()
            .filter(|(_, entry)| !entry.is_expired(at))
            .map(|(key, entry)| {
                let ttl = entry
                    .expire_at
                    .map(|deadline| deadline.saturating_duration_since(at).as_secs());
                (key.clone(), json!({"value": entry.value, "ttl": ttl}))
            })
            .collect();
        let hashes: Map<String, Value> = self
            .hashes
            .iter()
            .map(|(name, fields)| (name.clone(), json!(fields)))
            .collect();

        Reply::json(json!({
            "queues": queues,
            "cache": {"lists": lists, "strings": strings, "hashes": hashes},
        }))
    }

    fn push(&mut self, keyspace: Keyspace, request: &Request) -> Reply {
        let (Some(name), values) = request.target() else {
            return Reply::error("missing param name");
        };
        if values.is_empty() {
            return Reply::error("message is empty");
        }
        let count = values.len();
        let fifo = self.fifo_entry(keyspace, name);
        for value in values {
            fifo.offer(value.clone());
        }
        Reply::int(count)
    }

    fn pop(&mut self, keyspace: Keyspace, end: End, request: &Request) -> Reply {
        let (Some(name), _) = request.target() else {
            return Reply::error("missing param name");
        };
        self.fifos(keyspace)
            .get_mut(name)
            .and_then(|fifo| fifo.take(end))
            .map_or(Reply::Nil, Reply::text)
    }

    fn llen(&self, request: &Request) -> Reply {
        let (Some(name), _) = request.target() else {
            return Reply::error("missing param name");
        };
        let size = self
            .queues
            .get(name)
            .or_else(|| self.lists.get(name))
            .map_or(0, |fifo| fifo.items.len());
        Reply::int(size)
    }

    fn delete(&mut self, request: &Request) -> Reply {
        let (Some(name), _) = request.target() else {
            return Reply::error("missing param name");
        };
        let removed = [
            self.queues.remove(name).is_some(),
            self.lists.remove(name).is_some(),
            self.strings.remove(name).is_some(),
            self.hashes.remove(name).is_some(),
        ];
        Reply::int(i64::from(removed.contains(&true)))
    }

    fn set(&mut self, request: &Request, at: Instant) -> Reply {
        let (Some(key), rest) = request.target() else {
            return Reply::error("missing param key");
        };
        let Some(value) = rest.first().map(String::as_str).or_else(|| request.named("value")) else {
            return Reply::error("missing param value");
        };
        let expire = match request.expire() {
            Ok(expire) => expire,
            Err(message) => return Reply::error(message),
        };
        self.strings.insert(key.to_string(), entry(value.to_string(), expire, at));
        Reply::int(1)
    }

    fn get(&self, request: &Request, at: Instant) -> Reply {
        let (Some(key), _) = request.target() else {
            return Reply::error("missing param key");
        };
        self.strings
            .get(key)
            .filter(|entry| !entry.is_expired(at))
            .map_or(Reply::Nil, |entry| Reply::text(entry.value.clone()))
    }

    fn mset(&mut self, request: &Request, at: Instant) -> Reply {
        let expire = match request.expire() {
            Ok(expire) => expire,
            Err(message) => return Reply::error(message),
        };
        let pairs = match request.named("data") {
            Some(raw) => match json_object(raw) {
                Ok(pairs) => pairs,
                Err(message) => return Reply::error(message),
            },
            None => {
                let mut pairs = Vec::with_capacity(request.positional.len());
                for item in &request.positional {
                    match item.split_once('=') {
                        Some((key, value)) => pairs.push((key.to_string(), value.to_string())),
                        None => return Reply::error(format!("invalid param {item}, expect key=value")),
                    }
                }
                pairs
            }
        };
        let count = pairs.len();
        for (key, value) in pairs {
            self.strings.insert(key, entry(value, expire, at));
        }
        Reply::int(count)
    }

    fn hset(&mut self, request: &Request) -> Reply {
        let (Some(name), _) = request.target() else {
            return Reply::error("missing param name");
        };
        let Some(raw) = request.named("data") else {
            return Reply::error("missing param data");
        };
        let pairs = match json_object(raw) {
            Ok(pairs) => pairs,
            Err(message) => return Reply::error(message),
        };
        let count = pairs.len();
        self.hashes.entry(name.to_string()).or_default().extend(pairs);
        Reply::int(count)
    }

    fn hget(&self, request: &Request) -> Reply {
        let (Some(name), rest) = request.target() else {
            return Reply::error("missing param name");
        };
        let Some(field) = hash_field(request, rest) else {
            return Reply::error("missing param field");
        };
        self.hashes
            .get(name)
            .and_then(|fields| fields.get(field))
            .map_or(Reply::Nil, |value| Reply::text(value.clone()))
    }

    fn hgetall(&self, request: &Request) -> Reply {
        let (Some(name), _) = request.target() else {
            return Reply::error("missing param name");
        };
        let fields = self.hashes.get(name).cloned().unwrap_or_default();
        Reply::json(json!(fields))
    }

    fn hdel(&mut self, request: &Request) -> Reply {
        let (Some(name), rest) = request.target() else {
            return Reply::error("missing param name");
        };
        let Some(field) = hash_field(request, rest) else {
            return Reply::error("missing param field");
        };
        self.hashes
            .get_mut(name)
            .and_then(|fields| fields.remove(field))
            .map_or(Reply::Nil, Reply::text)
    }
}

fn entry(value: String, expire: Option<u64>, at: Instant) -> StringEntry {
    StringEntry {
        value,
        expire_at: expire.map(|seconds| at + Duration::from_secs(seconds)),
    }
}

fn hash_field<'a>(request: &'a Request, rest: &'a [String]) -> Option<&'a str> {
    rest.first().map(String::as_str).or_else(|| request.named("field"))
}

/// 字符串值原样保存，其他类型保存 JSON 文本
fn json_object(raw: &str) -> Result<Vec<(String, String)>, String> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map
            .into_iter()
            .map(|(key, value)| match value {
                Value::String(text) => (key, text),
                other => (key, other.to_string()),
            })
            .collect()),
        _ => Err("invalid param data, expect json object".to_string()),
    }
}
