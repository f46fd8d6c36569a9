//! SQL schema definitions.

/// Complete schema for the v1 database.
pub const SCHEMA_V1: &str = r#"
-- ============================================================
-- Subscriber registry
-- ============================================================

CREATE TABLE IF NOT EXISTS subscribers (
    msisdn TEXT PRIMARY KEY,
    opt_in INTEGER NOT NULL DEFAULT 0,
    opt_in_at INTEGER,
    opt_out_at INTEGER,
    points INTEGER NOT NULL DEFAULT 0 CHECK (points >= 0),
    version INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_subscribers_opt_in ON subscribers(opt_in);

-- ============================================================
-- Top-up ledger (append-only)
-- ============================================================

CREATE TABLE IF NOT EXISTS topups (
    id TEXT PRIMARY KEY,
    msisdn TEXT NOT NULL REFERENCES subscribers(msisdn),
    amount INTEGER NOT NULL CHECK (amount > 0),
    awarded_points INTEGER NOT NULL CHECK (awarded_points >= 0),
    timestamp INTEGER NOT NULL,
    ingested_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_topups_msisdn_ts ON topups(msisdn, timestamp);
CREATE INDEX IF NOT EXISTS idx_topups_ts ON topups(timestamp);

CREATE TRIGGER IF NOT EXISTS trg_topups_immutable
BEFORE UPDATE ON topups
BEGIN
    SELECT RAISE(ABORT, 'top-ups are immutable');
END;

-- ============================================================
-- Draws
-- ============================================================

CREATE TABLE IF NOT EXISTS draws (
    id TEXT PRIMARY KEY,
    draw_date TEXT NOT NULL,
    draw_type TEXT NOT NULL CHECK (draw_type IN ('DAILY', 'SATURDAY')),
    status TEXT NOT NULL CHECK (status IN ('SCHEDULED', 'RUNNING', 'COMPLETED', 'FAILED')),
    eligible_digits TEXT NOT NULL CHECK (length(eligible_digits) > 0),
    lookback_secs INTEGER NOT NULL CHECK (lookback_secs > 0),
    prize_structure TEXT NOT NULL,
    unawarded TEXT NOT NULL DEFAULT '[]',
    seed INTEGER,
    executed_at INTEGER,
    failure_reason TEXT,
    retry_of TEXT REFERENCES draws(id),
    created_at INTEGER NOT NULL
);

-- Failed draws stay for audit and do not block a replacement.
CREATE UNIQUE INDEX IF NOT EXISTS idx_draws_date_type
    ON draws(draw_date, draw_type) WHERE status != 'FAILED';
CREATE INDEX IF NOT EXISTS idx_draws_status ON draws(status);

CREATE TRIGGER IF NOT EXISTS trg_draws_completed_immutable
BEFORE UPDATE ON draws
WHEN OLD.status = 'COMPLETED'
BEGIN
    SELECT RAISE(ABORT, 'completed draw is immutable');
END;

CREATE TABLE IF NOT EXISTS draw_winners (
    draw_id TEXT NOT NULL REFERENCES draws(id),
    position INTEGER NOT NULL,
    msisdn TEXT NOT NULL,
    rank INTEGER NOT NULL,
    prize_amount INTEGER NOT NULL,
    picked_at INTEGER NOT NULL,
    notification_status TEXT NOT NULL DEFAULT 'PENDING'
        CHECK (notification_status IN ('PENDING', 'SENT', 'FAILED')),
    PRIMARY KEY (draw_id, position),
    UNIQUE (draw_id, msisdn)
);

CREATE TRIGGER IF NOT EXISTS trg_winners_insert_running
BEFORE INSERT ON draw_winners
WHEN (SELECT status FROM draws WHERE id = NEW.draw_id) IS NOT 'RUNNING'
BEGIN
    SELECT RAISE(ABORT, 'winners can only be written while the draw is running');
END;

CREATE TRIGGER IF NOT EXISTS trg_winners_identity_immutable
BEFORE UPDATE OF draw_id, position, msisdn, rank, prize_amount, picked_at ON draw_winners
BEGIN
    SELECT RAISE(ABORT, 'winner records are immutable');
END;

CREATE TRIGGER IF NOT EXISTS trg_winners_no_delete
BEFORE DELETE ON draw_winners
WHEN (SELECT status FROM draws WHERE id = OLD.draw_id) = 'COMPLETED'
BEGIN
    SELECT RAISE(ABORT, 'completed draw is immutable');
END;

-- ============================================================
-- Notification outbox
-- ============================================================

CREATE TABLE IF NOT EXISTS notification_outbox (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    correlation_id TEXT NOT NULL UNIQUE,
    draw_id TEXT NOT NULL REFERENCES draws(id),
    msisdn TEXT NOT NULL,
    body TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'QUEUED' CHECK (state IN ('QUEUED', 'SENT', 'FAILED')),
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    gateway TEXT,
    next_attempt_at INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_outbox_due ON notification_outbox(state, next_attempt_at);
"#;
