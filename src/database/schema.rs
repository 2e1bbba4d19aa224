pub const CURRENT_SCHEMA: &str = r#"
PRAGMA foreign_keys = 1;

CREATE TABLE IF NOT EXISTS staff (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    username TEXT NOT NULL UNIQUE,
    password TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS principals (
    id INTEGER PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    password TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS team_leaders (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    gender TEXT NOT NULL,
    age_undertaken INTEGER NOT NULL,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS students (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    age INTEGER NOT NULL,
    gender TEXT NOT NULL,
    phone TEXT NOT NULL DEFAULT '',
    address TEXT NOT NULL DEFAULT '',
    team_leader_id INTEGER,
    registered_by INTEGER,
    registered_date TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (team_leader_id) REFERENCES team_leaders (id),
    FOREIGN KEY (registered_by) REFERENCES staff (id)
);

CREATE TABLE IF NOT EXISTS team_rosters (
    team_leader_id INTEGER NOT NULL,
    student_id INTEGER NOT NULL,
    PRIMARY KEY (team_leader_id, student_id),
    FOREIGN KEY (team_leader_id) REFERENCES team_leaders (id),
    FOREIGN KEY (student_id) REFERENCES students (id)
);

CREATE TABLE IF NOT EXISTS sessions (
    id INTEGER PRIMARY KEY,
    role TEXT NOT NULL,
    account_id INTEGER NOT NULL,
    token TEXT NOT NULL UNIQUE,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    expires_at TIMESTAMP NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_team_leaders_eligibility ON team_leaders (age_undertaken, gender);
CREATE INDEX IF NOT EXISTS idx_students_team_leader ON students (team_leader_id);
CREATE INDEX IF NOT EXISTS idx_students_registered_date ON students (registered_date);
CREATE INDEX IF NOT EXISTS idx_team_rosters_student ON team_rosters (student_id);
"#;
