use scheduler_core::SchedulerResult;
use sqlx::SqlitePool;
use tracing::debug;

const TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS categories (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        parent INTEGER REFERENCES categories(id) ON DELETE SET NULL,
        config TEXT NOT NULL DEFAULT '{}'
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tasks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        parent INTEGER REFERENCES tasks(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        category INTEGER REFERENCES categories(id) ON DELETE SET NULL,
        status TEXT NOT NULL DEFAULT 'enabled',
        config TEXT NOT NULL DEFAULT '{}',
        create_time TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS schedules (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        task INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
        priority INTEGER NOT NULL DEFAULT 0,
        next_schedule_time TEXT NOT NULL,
        schedule_start_time TEXT NOT NULL,
        schedule_end_time TEXT NOT NULL,
        config TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'opening',
        is_strict INTEGER NOT NULL DEFAULT 0,
        callback TEXT,
        preserve_log INTEGER NOT NULL DEFAULT 0,
        create_time TEXT NOT NULL,
        update_time TEXT NOT NULL
    )
    "#,
    // 日志不约束计划外键: 计划删除后日志仍保留，重试时报告 "no such schedule"
    r#"
    CREATE TABLE IF NOT EXISTS schedule_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        schedule INTEGER NOT NULL,
        status TEXT NOT NULL,
        queue TEXT NOT NULL,
        result TEXT NOT NULL DEFAULT 'null',
        schedule_time TEXT NOT NULL,
        create_time TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS schedule_queues (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        code TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL UNIQUE,
        status INTEGER NOT NULL DEFAULT 1,
        module TEXT NOT NULL,
        config TEXT NOT NULL DEFAULT '{}'
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS schedule_producers (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        filters TEXT NOT NULL DEFAULT '{}',
        lte_now INTEGER NOT NULL DEFAULT 1,
        queue TEXT NOT NULL,
        status INTEGER NOT NULL DEFAULT 1
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS queue_permissions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        queue TEXT NOT NULL,
        type TEXT NOT NULL,
        config TEXT NOT NULL DEFAULT '{}',
        status INTEGER NOT NULL DEFAULT 1
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS exception_reports (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        client TEXT NOT NULL DEFAULT '',
        ip TEXT NOT NULL DEFAULT '',
        content TEXT NOT NULL,
        create_time TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS operators (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT NOT NULL UNIQUE,
        create_time TEXT NOT NULL
    )
    "#,
];

const INDEXES: &[&str] = &[
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_tasks_name_parent ON tasks(name, IFNULL(parent, 0))",
    "CREATE INDEX IF NOT EXISTS idx_schedules_status_next ON schedules(status, next_schedule_time)",
    "CREATE INDEX IF NOT EXISTS idx_schedules_task ON schedules(task)",
    "CREATE INDEX IF NOT EXISTS idx_logs_create_time ON schedule_logs(create_time)",
    "CREATE INDEX IF NOT EXISTS idx_logs_schedule_time ON schedule_logs(schedule, schedule_time)",
    "CREATE INDEX IF NOT EXISTS idx_permissions_queue ON queue_permissions(queue, status)",
];

/// 运行数据库迁移，可重复执行
pub async fn run_migrations(pool: &SqlitePool) -> SchedulerResult<()> {
    debug!("Running SQLite database migrations");
    for sql in TABLES.iter().chain(INDEXES) {
        sqlx::query(sql).execute(pool).await?;
    }
    debug!("Successfully completed SQLite database migrations");
    Ok(())
}
